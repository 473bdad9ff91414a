use paced_queue::{CompletionInfo, Queue, QueueOptions};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn fetch(url: String) -> Result<usize, String> {
  info!("Fetching {}", url);
  tokio::time::sleep(Duration::from_millis(50)).await;
  Ok(url.len())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Throttled Crawl Example (one request every 250ms, at most 2 in flight) ---");

  let queue = Queue::<String, usize, String>::new(
    "crawl_queue",
    QueueOptions::new()
      .with_concurrency(2)
      .with_throttle(Duration::from_millis(250)),
    Handle::current(),
  )
  .expect("Queue options are valid");

  queue.add_completion_handler(|info: CompletionInfo| {
    info!("Entry {} settled with {:?}", info.entry_id, info.status);
  });

  let urls = [
    "https://example.com/zebra",
    "https://example.com/apple",
    "https://example.com/mango",
    "https://example.com/kiwi",
    "https://example.com/banana",
  ];
  let handles: Vec<_> = urls.iter().map(|url| queue.append(url.to_string(), fetch)).collect();

  // Crawl the remaining pages alphabetically and skip one of them.
  queue.sort(|a, b| a.cmp(b));
  queue.cancel(&"https://example.com/mango".to_string());
  info!("Waiting after sort and cancel: {:?}", queue.get_waiting());

  // Relax the throttle halfway through.
  tokio::time::sleep(Duration::from_millis(400)).await;
  queue.set_throttle(Duration::from_millis(50));

  for (url, handle) in urls.iter().zip(handles) {
    match handle.await_result().await {
      Ok(bytes) => info!("{} -> {} bytes", url, bytes),
      Err(e) => info!("{} -> {}", url, e),
    }
  }

  queue.idle().await;
  info!("--- Throttled Crawl Example End ---");
}
