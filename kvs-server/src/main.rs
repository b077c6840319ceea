use log::info;

fn main() -> std::io::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let listener = kvs_server::bind(kvs_server::config::SERVER_ADDRESS)?;
    info!("kvs-server listening on {}", kvs_server::config::SERVER_ADDRESS);
    kvs_server::serve(listener)
}
