fn main() {
    use loki_provider::{Fields, Level, LoggerProvider, LokiProvider, Value};
    use url::Url;

    let my_loki = LokiProvider::builder()
        .endpoint(Url::parse("http://localhost:3100").unwrap())
        .job("simple-logging")
        .app("demo")
        .level(Level::Debug)
        .on_send_error(|error| eprintln!("Failed to send log to Loki: {}", error))
        .build()
        .unwrap();

    let fields = Fields::from([
        ("disk".to_string(), Value::from("/dev/sda1")),
        ("usage".to_string(), Value::from(0.97)),
    ]);

    my_loki.write(Level::Debug, "This is a DEBUG message", &Fields::new()).unwrap();
    my_loki.write(Level::Info, "This is a INFO message", &Fields::new()).unwrap();
    my_loki.write(Level::Warn, "disk almost full", &fields).unwrap();
    my_loki.write(Level::Error, "This is a ERROR message", &Fields::new()).unwrap();
    my_loki.write(Level::Fatal, "This is a FATAL message", &Fields::new()).unwrap();

    my_loki.close().unwrap();
}
