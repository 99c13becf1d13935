//! cast-queue - Inspect and manage posts and the publication queue
//!
//! Unix-style tool over the post store and job queue: list and show posts,
//! edit or reschedule them, publish right away, and look after dead letters.

use clap::{Parser, Subcommand};
use libcastline::scheduling::{format_time_until, parse_schedule};
use libcastline::service::posts::PostUpdate;
use libcastline::types::parse_platform_list;
use libcastline::{
    CastError, CastlineService, Job, Post, PostStatus, PostWithOutcomes, QueueStats, Result,
};
use tracing::debug;

#[derive(Parser, Debug)]
#[command(name = "cast-queue")]
#[command(version)]
#[command(about = "Inspect and manage posts and the publication queue")]
#[command(long_about = "\
cast-queue - Inspect and manage posts and the publication queue

DESCRIPTION:
    cast-queue lists and edits posts, moves them between draft and
    scheduled, publishes them right away and reports on the job queue.
    Publication itself happens in cast-send.

COMMANDS:
    list        List posts, newest first
    show        Show one post with its per-platform outcomes
    update      Edit content, media, platforms or schedule
    delete      Delete a post and cancel its job
    now         Publish a post as soon as a worker is free
    stats       Job counts by state
    dead        List dead-lettered jobs
    requeue     Give a dead-lettered job another round of attempts

USAGE EXAMPLES:
    cast-queue --owner alice list --status scheduled
    cast-queue --owner alice update <POST_ID> --at \"tomorrow 3pm\"
    cast-queue --owner alice update <POST_ID> --clear-schedule
    cast-queue --owner alice now <POST_ID>
    cast-queue stats --format json

CONFIGURATION:
    Configuration file: ~/.config/castline/config.toml
    Database location: ~/.local/share/castline/castline.db

    Override with environment variables:
        CASTLINE_CONFIG    - Path to config file
        CASTLINE_DB_PATH   - Path to database file
        CASTLINE_OWNER     - Default --owner

EXIT CODES:
    0 - Success
    1 - Operation failed (e.g. the post is being published)
    2 - Database, configuration or queue error
    3 - Invalid input or post not found
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Owner whose posts to manage
    #[arg(long, global = true, env = "CASTLINE_OWNER")]
    owner: Option<String>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List posts
    List {
        /// Only posts with this status (draft, scheduled, publishing, published, failed)
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show a post and its outcome log
    Show {
        post_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Edit a post that has not been published
    Update {
        post_id: String,

        /// New content
        #[arg(long)]
        content: Option<String>,

        /// New media URL
        #[arg(long, value_name = "URL", conflicts_with = "clear_media")]
        media: Option<String>,

        /// Remove the media URL
        #[arg(long)]
        clear_media: bool,

        /// New platform list, comma-separated
        #[arg(short, long)]
        platform: Option<String>,

        /// Schedule or reschedule (e.g. "2h", "tomorrow 3pm")
        #[arg(long, value_name = "WHEN", conflicts_with = "clear_schedule")]
        at: Option<String>,

        /// Cancel the schedule and turn the post back into a draft
        #[arg(long)]
        clear_schedule: bool,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Delete a post, cancelling its job
    Delete { post_id: String },

    /// Publish immediately
    Now { post_id: String },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List dead-lettered jobs
    Dead {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Requeue a dead-lettered job
    Requeue { job_id: String },
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
    let service = CastlineService::new().await?;
    let result = execute(&service, cli).await;
    service.close().await;
    result
}

async fn execute(service: &CastlineService, cli: Cli) -> Result<()> {
    let owner = cli.owner.as_deref();
    debug!(command = ?cli.command, owner = ?owner, "Running command");

    match cli.command {
        Commands::List {
            status,
            limit,
            format,
        } => {
            check_format(&format)?;
            let status = status.as_deref().map(str::parse::<PostStatus>).transpose()?;
            let posts = service
                .posts()
                .list_posts(require_owner(owner)?, status, limit)
                .await?;
            output_list(&posts, &format)
        }
        Commands::Show { post_id, format } => {
            check_format(&format)?;
            let post = service.posts().get_post(&post_id, require_owner(owner)?).await?;
            output_show(&post, &format)
        }
        Commands::Update {
            post_id,
            content,
            media,
            clear_media,
            platform,
            at,
            clear_schedule,
            format,
        } => {
            check_format(&format)?;
            let update = PostUpdate {
                content,
                media_url: if clear_media { Some(None) } else { media.map(Some) },
                platforms: platform.as_deref().map(parse_platform_list).transpose()?,
                scheduled_at: if clear_schedule {
                    Some(None)
                } else {
                    at.as_deref().map(parse_schedule).transpose()?.map(Some)
                },
            };
            let post = service
                .posts()
                .update_post(&post_id, require_owner(owner)?, update)
                .await?;
            output_post(&post, &format)
        }
        Commands::Delete { post_id } => {
            service
                .posts()
                .delete_post(&post_id, require_owner(owner)?)
                .await?;
            println!("Deleted {}", post_id);
            Ok(())
        }
        Commands::Now { post_id } => {
            let post = service
                .posts()
                .publish_now(&post_id, require_owner(owner)?)
                .await?;
            println!(
                "{}\t{}\t{}",
                post.id,
                post.status,
                post.job_id.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        Commands::Stats { format } => {
            check_format(&format)?;
            output_stats(&service.posts().queue_stats().await, &format)
        }
        Commands::Dead { limit, format } => {
            check_format(&format)?;
            let jobs = service.queue().dead_letters(limit).await?;
            output_dead(&jobs, &format)
        }
        Commands::Requeue { job_id } => {
            service.posts().requeue_dead(&job_id).await?;
            println!("Requeued {}", job_id);
            Ok(())
        }
    }
}

fn require_owner(owner: Option<&str>) -> Result<&str> {
    owner.ok_or_else(|| {
        CastError::Validation("--owner (or CASTLINE_OWNER) is required for this command".to_string())
    })
}

fn check_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(CastError::Validation(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| CastError::Validation(format!("Failed to serialize output: {}", e)))?;
    println!("{}", json);
    Ok(())
}

fn output_list(posts: &[Post], format: &str) -> Result<()> {
    if format == "json" {
        return print_json(&posts);
    }

    for post in posts {
        let when = match (post.status, post.scheduled_at) {
            (PostStatus::Scheduled, Some(ts)) => format_time_until(ts),
            _ => "-".to_string(),
        };
        let platforms: Vec<&str> = post.platforms.iter().map(|p| p.as_str()).collect();
        println!(
            "{} | {} | {} | {} | {}",
            post.id,
            post.status,
            platforms.join(","),
            when,
            truncate_content(&post.content, 50)
        );
    }
    Ok(())
}

fn output_post(post: &Post, format: &str) -> Result<()> {
    if format == "json" {
        return print_json(post);
    }
    println!("{}\t{}", post.id, post.status);
    Ok(())
}

fn output_show(post: &PostWithOutcomes, format: &str) -> Result<()> {
    if format == "json" {
        return print_json(post);
    }

    let p = &post.post;
    let platforms: Vec<&str> = p.platforms.iter().map(|p| p.as_str()).collect();
    println!("ID:        {}", p.id);
    println!("Status:    {}", p.status);
    println!("Platforms: {}", platforms.join(", "));
    if let Some(ts) = p.scheduled_at {
        println!("Scheduled: {} ({})", format_timestamp(ts), format_time_until(ts));
    }
    if let Some(ts) = p.published_at {
        println!("Published: {}", format_timestamp(ts));
    }
    if let Some(media) = &p.media_url {
        println!("Media:     {}", media);
    }
    println!("Retries:   {}", p.retry_count);
    println!();
    println!("{}", p.content);

    if !post.outcomes.is_empty() {
        println!();
        for outcome in &post.outcomes {
            let detail = if outcome.success {
                format!("ok {}", outcome.external_id.as_deref().unwrap_or(""))
            } else {
                format!("failed: {}", outcome.error_message.as_deref().unwrap_or("unknown error"))
            };
            println!(
                "#{} {:<10} {} ({})",
                outcome.attempt,
                outcome.platform.as_str(),
                detail,
                format_timestamp(outcome.recorded_at)
            );
        }
    }
    Ok(())
}

fn output_stats(stats: &QueueStats, format: &str) -> Result<()> {
    if format == "json" {
        return print_json(stats);
    }
    println!("waiting:   {}", stats.waiting);
    println!("delayed:   {}", stats.delayed);
    println!("active:    {}", stats.active);
    println!("completed: {}", stats.completed);
    println!("failed:    {}", stats.failed);
    Ok(())
}

fn output_dead(jobs: &[Job], format: &str) -> Result<()> {
    if format == "json" {
        return print_json(&jobs);
    }
    for job in jobs {
        println!(
            "{} | post {} | {} attempts | {}",
            job.id,
            job.post_id,
            job.attempts,
            job.last_error.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let cut: String = single_line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
