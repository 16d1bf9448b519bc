// Mars Round-Trip - binary entry point
// Logs go to stderr; stdout carries the JSON message stream

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = mars_roundtrip_lib::run().await {
        log::error!("{e}");
        std::process::exit(1);
    }
}
