#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vendsync_lib::run().await
}
