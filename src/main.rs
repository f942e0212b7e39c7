mod auth;
mod config;
mod errors;
mod mail;
mod message;
mod oauth;
mod pipeline;
mod report;
mod summarize;

use anyhow::Result;
use auth::{FileCredentialStore, InstalledAppAuthorizer};
use clap::Parser;
use config::{Args, Settings};
use google_gmail1::Gmail;
use log::info;
use mail::GmailSource;
use summarize::OpenAiChat;

#[tokio::main]
async fn main() -> Result<()> {
    // OPENAI_API_KEY may also be provided through a .env file
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let store = FileCredentialStore::new(&args.token_cache);
    info!("Credentials expected at: {}", args.credentials.display());
    info!("Token cache will be at: {}", store.path().display());

    println!("Authenticating with Gmail...");
    let authorizer = InstalledAppAuthorizer::new(&args.credentials);
    let credential = auth::authenticate(&store, &authorizer).await?;
    println!("Authentication successful!\n");

    let client = hyper::Client::builder().build(
        hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build(),
    );

    let source = GmailSource::new(Gmail::new(client.clone(), credential.access_token));
    let chat = OpenAiChat::from_env(client);

    pipeline::run(&source, chat.as_ref(), &Settings::from(&args)).await?;
    Ok(())
}
