use crate::auth::{CLIENT_SECRET_FILE, TOKEN_CACHE_FILE};
use crate::mail::{FEEDBACK_QUERY, MAX_MESSAGES};
use crate::report::REPORT_FILE;
use crate::summarize::DEFAULT_MODEL;
use clap::Parser;
use std::path::PathBuf;

/// Summarize interview feedback emails from Gmail with an OpenAI model.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// OAuth client registration downloaded from the Google Cloud console
    #[clap(long, value_parser, default_value = CLIENT_SECRET_FILE)]
    pub credentials: PathBuf,

    /// Where the access and refresh tokens are cached between runs
    #[clap(long, value_parser, default_value = TOKEN_CACHE_FILE)]
    pub token_cache: PathBuf,

    /// Markdown report to (over)write
    #[clap(short, long, value_parser, default_value = REPORT_FILE)]
    pub output: PathBuf,

    /// Gmail search query selecting the feedback emails
    #[clap(short, long, value_parser, default_value = FEEDBACK_QUERY)]
    pub query: String,

    /// Number of emails to summarize (at most 10)
    #[clap(short, long, value_parser = clap::value_parser!(u32).range(1..=MAX_MESSAGES as i64), default_value_t = MAX_MESSAGES)]
    pub max_results: u32,

    /// Chat model used for the summary
    #[clap(long, value_parser, default_value = DEFAULT_MODEL)]
    pub model: String,

    #[clap(short, long, action)]
    pub debug: bool,
}

/// What the pipeline needs from the command line.
#[derive(Debug, Clone)]
pub struct Settings {
    pub query: String,
    pub max_results: u32,
    pub model: String,
    pub output: PathBuf,
}

impl From<&Args> for Settings {
    fn from(args: &Args) -> Self {
        Self {
            query: args.query.clone(),
            max_results: args.max_results,
            model: args.model.clone(),
            output: args.output.clone(),
        }
    }
}
