use crate::config::Settings;
use crate::errors::AppError;
use crate::mail::{self, Fetched, MailSource};
use crate::message::{extract_body, extract_date};
use crate::report;
use crate::summarize::{self, ChatCompletion, SummaryOutcome};
use log::debug;
use std::path::PathBuf;

/// Fetch, extract, summarize, write. Returns the absolute report path.
pub async fn run<M, C>(
    source: &M,
    chat: Option<&C>,
    settings: &Settings,
) -> Result<PathBuf, AppError>
where
    M: MailSource + ?Sized,
    C: ChatCompletion + ?Sized,
{
    println!("Fetching feedback emails...");
    let fetched = mail::fetch_feedback_emails(source, &settings.query, settings.max_results).await?;
    match &fetched {
        Fetched::Messages(messages) => println!("Found {} feedback email(s)", messages.len()),
        Fetched::NoMatches => println!("No feedback emails found."),
        Fetched::ListingFailed(e) => println!("An error occurred: {}", e),
    }

    let emails = fetched.into_messages();
    let mut bodies = Vec::with_capacity(emails.len());
    for (index, email) in emails.iter().enumerate() {
        debug!(
            "Email {} ({}) received {}",
            index + 1,
            email.id.as_deref().unwrap_or("?"),
            extract_date(email)
        );
        bodies.push(extract_body(email)?);
    }

    let outcome = summarize::summarize(chat, &settings.model, &bodies).await;
    match &outcome {
        SummaryOutcome::Generated(_) => {}
        SummaryOutcome::Empty => println!("The model returned an empty summary."),
        SummaryOutcome::Skipped => {
            println!("OpenAI API key not found. Skipping summary generation.")
        }
        SummaryOutcome::Failed(e) => println!("Failed to generate summary with OpenAI: {}", e),
    }

    let output_file = report::write_report(&settings.output, outcome.text())?;
    println!("\nSaved Markdown summary to {}", output_file.display());
    Ok(output_file)
}
