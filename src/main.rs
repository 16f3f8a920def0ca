#[tokio::main]
async fn main() -> anyhow::Result<()> {
    attendance_capture::run().await
}
