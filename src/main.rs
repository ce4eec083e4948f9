use query_gateway::app;
use query_gateway::config;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn main() {
    let args = app::parse();
    app::init_logging(&args);

    let runtime = tokio::runtime::Runtime::new().expect("failed to build bootstrap runtime");
    let loaded = runtime.block_on(app::load_config(&args));
    let loaded_config = match loaded {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(exitcode::CONFIG);
        }
    };
    config::set_config(loaded_config.clone());
    drop(runtime);

    if let Err(err) = app::run_server(args, loaded_config) {
        eprintln!("server error: {err}");
        std::process::exit(exitcode::SOFTWARE);
    }
}
