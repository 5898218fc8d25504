fn main() {
    use log::{debug, error, info, set_boxed_logger, set_max_level, trace, warn, LevelFilter};
    use loki_provider::{Level, LokiProvider};
    use url::Url;

    let my_loki = LokiProvider::builder()
        .endpoint(Url::parse("http://localhost:3100").unwrap())
        .job("structured-logging")
        .app("demo")
        .level(Level::Debug)
        .tag("service", "structured-logging")
        .build()
        .unwrap();

    // set the actual logger for the facade
    set_boxed_logger(Box::new(my_loki)).unwrap();
    set_max_level(LevelFilter::Trace);

    // use the regular log macros for actual logging in the app
    trace!(component = "demo"; "This is a TRACE message");
    debug!(component = "demo"; "This is a DEBUG message");
    info!(component = "demo"; "This is a INFO message");
    warn!(component = "demo", critical = true; "This is a WARN message");
    error!(component = "demo", attempt = 3; "This is a ERROR message");

    log::logger().flush();
}
