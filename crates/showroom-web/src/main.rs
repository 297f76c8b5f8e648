use anyhow::Result;

use showroom_web::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init("showroom-web")?;
    showroom_web::server::run().await
}
