//! Seekstream-rs emulator binary.
//!
//! Serves an in-memory upload-session object store for local development.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use seekstream_rs::{Args, Config, UploadServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = Config::from(args);
    let server = UploadServer::new(config);

    println!(
        r#"
Upload emulator is starting at {}

Root folder: {}
Items:       {}/items/{{id}}
Uploads:     PUT {}/upload/{{session_id}} with Content-Range

Press Ctrl+C to stop the server.
"#,
        server.bind_address(),
        server.store().root_id(),
        server.base_url(),
        server.base_url()
    );

    server.run().await
}
