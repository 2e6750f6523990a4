use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const TAIL_LINES: usize = 50;

/// Re-emits a daemon's stdout/stderr as log lines scoped to the process and
/// remembers the last few so a fatal exit can be explained.
#[derive(Clone)]
pub struct OutputCapture {
	process: Arc<str>,
	tail: Arc<Mutex<VecDeque<String>>>,
}

impl OutputCapture {
	pub fn new(process: &str) -> Self {
		Self {
			process: Arc::from(process),
			tail: Arc::new(Mutex::new(VecDeque::with_capacity(TAIL_LINES))),
		}
	}

	pub fn forward<R>(&self, reader: R, stream: &'static str) -> JoinHandle<()>
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		let capture = self.clone();
		tokio::spawn(async move {
			let mut lines = BufReader::new(reader).lines();
			while let Ok(Some(line)) = lines.next_line().await {
				capture.write(line, stream).await;
			}
		})
	}

	async fn write(&self, line: String, stream: &'static str) {
		tracing::info!(process = %self.process, stream, "{}", line);
		let mut tail = self.tail.lock().await;
		if tail.len() >= TAIL_LINES {
			tail.pop_front();
		}
		tail.push_back(line);
	}

	pub async fn snapshot(&self) -> Vec<String> {
		self.tail.lock().await.iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn keeps_the_last_lines() {
		let capture = OutputCapture::new("syncthing");
		let input: String = (0..60).map(|i| format!("line {}\n", i)).collect();
		capture
			.forward(std::io::Cursor::new(input.into_bytes()), "stdout")
			.await
			.unwrap();

		let tail = capture.snapshot().await;
		assert_eq!(tail.len(), TAIL_LINES);
		assert_eq!(tail.first().map(String::as_str), Some("line 10"));
		assert_eq!(tail.last().map(String::as_str), Some("line 59"));
	}
}
