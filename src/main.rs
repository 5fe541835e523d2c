mod auth;
mod beatport;
mod cli;
mod config;
mod db;
mod prompt;
mod sync;
#[cfg(test)]
mod test_http;
mod track_name;
mod types;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    cli::main().await
}
