//! cast-post - Create draft and scheduled posts

use std::io::{IsTerminal, Read};

use clap::Parser;
use libcastline::ai::{CaptionLength, ContentGenerator, GenerationKind, GenerationRequest, OpenAiGenerator};
use libcastline::scheduling::parse_schedule;
use libcastline::service::posts::NewPost;
use libcastline::types::parse_platform_list;
use libcastline::{CastError, CastlineService, Post, Result};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "cast-post")]
#[command(version)]
#[command(about = "Create draft and scheduled posts")]
#[command(long_about = "\
cast-post - Create draft and scheduled posts

DESCRIPTION:
    cast-post stores a post for one or more platforms. Without --at the post
    is a draft; with --at it is scheduled and published by cast-send when
    the time comes. Content is read from stdin when not given as an argument.

USAGE EXAMPLES:
    # Save a draft
    cast-post --owner alice --platform twitter \"Hello world\"

    # Schedule for two platforms
    echo \"Launch day\" | cast-post --owner alice --platform twitter,linkedin --at \"tomorrow 9am\"

    # Let the AI draft the caption
    cast-post --owner alice --platform instagram --media https://cdn.example.com/a.jpg \\
        --generate \"our new espresso machine\" --tone playful

TIME FORMATS (--at):
    Durations:        30m, 2h, 1day 4h
    Natural language: tomorrow 3pm, next monday 10am
    RFC 3339:         2026-11-20T15:00:00Z

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database, configuration or queue error
    3 - Invalid input or missing platform account
")]
struct Cli {
    /// Content to post (reads from stdin if not provided)
    content: Option<String>,

    /// Owner of the post
    #[arg(long, env = "CASTLINE_OWNER")]
    owner: String,

    /// Target platform(s), comma-separated (twitter, linkedin, instagram)
    #[arg(short, long)]
    platform: String,

    /// Media URL to attach
    #[arg(short, long, value_name = "URL")]
    media: Option<String>,

    /// Publish at this time instead of saving a draft
    #[arg(long, value_name = "WHEN")]
    at: Option<String>,

    /// Generate the caption from this prompt
    #[arg(long, value_name = "PROMPT", conflicts_with = "content")]
    generate: Option<String>,

    /// Tone for generated captions
    #[arg(long, requires = "generate")]
    tone: Option<String>,

    /// Length of generated captions: short, medium or long
    #[arg(long, requires = "generate")]
    length: Option<String>,

    /// Also generate an image when no --media is given
    #[arg(long, requires = "generate")]
    image: bool,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libcastline::logging::init_from_env(cli.verbose, "warn");

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.format != "text" && cli.format != "json" {
        return Err(CastError::Validation(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }

    let platforms = parse_platform_list(&cli.platform)?;
    let scheduled_at = cli.at.as_deref().map(parse_schedule).transpose()?;

    let service = CastlineService::new().await?;

    let mut media_url = cli.media.clone();
    let mut ai_metadata = None;
    let content = match &cli.generate {
        Some(prompt) => {
            let generated = generate(&service, &cli, prompt, platforms.first().copied()).await?;
            if media_url.is_none() {
                media_url = generated.image_url.clone();
            }
            let caption = generated
                .captions
                .as_ref()
                .and_then(|c| c.first().cloned())
                .ok_or_else(|| CastError::Generation("no caption was generated".to_string()))?;
            ai_metadata = Some(serde_json::json!({
                "prompt": prompt,
                "tone": cli.tone,
                "length": cli.length,
                "captions": generated.captions,
                "image_url": generated.image_url,
            }));
            caption
        }
        None => read_content(cli.content.clone())?,
    };

    let post = service
        .posts()
        .create_post(NewPost {
            owner_id: cli.owner.clone(),
            content,
            platforms,
            media_url,
            scheduled_at,
            ai_metadata,
        })
        .await;
    service.close().await;
    let post = post?;
    debug!(post_id = %post.id, status = %post.status, "Post created");

    print_post(&post, &cli.format);
    Ok(())
}

async fn generate(
    service: &CastlineService,
    cli: &Cli,
    prompt: &str,
    platform: Option<libcastline::PlatformId>,
) -> Result<libcastline::ai::GeneratedContent> {
    let generator = OpenAiGenerator::from_config(&service.config().ai)?;
    debug!(platform = ?platform, image = cli.image, "Generating content");
    let kind = if cli.image && cli.media.is_none() {
        GenerationKind::Both
    } else {
        GenerationKind::Text
    };
    let length = cli
        .length
        .as_deref()
        .map(str::parse::<CaptionLength>)
        .transpose()?;

    generator
        .generate(&GenerationRequest {
            prompt: prompt.to_string(),
            kind,
            platform,
            tone: cli.tone.clone(),
            length,
        })
        .await
}

/// Content from the argument, else from piped stdin
fn read_content(arg: Option<String>) -> Result<String> {
    if let Some(content) = arg {
        return Ok(content);
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(CastError::Validation(
            "No content provided (pass it as an argument or pipe it on stdin)".to_string(),
        ));
    }

    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .map_err(|e| CastError::Validation(format!("Failed to read stdin: {}", e)))?;
    Ok(buffer.trim_end_matches('\n').to_string())
}

fn print_post(post: &Post, format: &str) {
    if format == "json" {
        match serde_json::to_string_pretty(post) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: failed to serialize post: {}", e),
        }
        return;
    }

    match post.scheduled_at.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)) {
        Some(at) => println!("{}\t{}\t{}", post.id, post.status, at.to_rfc3339()),
        None => println!("{}\t{}", post.id, post.status),
    }
}
