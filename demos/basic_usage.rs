use paced_queue::{Queue, QueueOptions, ResultHandle};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn resize_image(id: usize, delay_ms: u64) -> Result<String, String> {
  info!("Image {} starting, will take {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id == 3 {
    return Err(format!("Image {} is corrupt", id));
  }
  Ok(format!("Image {} resized after {}ms", id, delay_ms))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let queue = Queue::<usize, String, String>::new("basic_queue", QueueOptions::new().with_concurrency(2), Handle::current())
    .expect("Queue options are valid");

  let mut handles: Vec<ResultHandle<String, String>> = Vec::new();
  for i in 0..5 {
    let delay_ms: u64 = 300 + (i as u64 % 3 * 150);
    let handle = queue.append(i, move |id| resize_image(id, delay_ms));
    info!("Enqueued image {} as entry {}", i, handle.id());
    handles.push(handle);
  }

  // The last image is urgent: move it to the front of the waiting list.
  let urgent = queue.prepend(99, |id| resize_image(id, 100));
  info!("Waiting order after prepend: {:?}", queue.get_waiting());
  handles.push(urgent);

  for handle in handles {
    let entry_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Entry {}: {}", entry_id, result),
      Err(e) => info!("Entry {} failed: {}", entry_id, e),
    }
  }

  queue.idle().await;
  info!("--- Basic Usage Example End ---");
}
