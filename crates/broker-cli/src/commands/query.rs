//! `broker agents` / `broker sessions` / `broker thread` - read-only queries
//! against the daemon's introspection socket (spec §4.12).

use anyhow::Result;
use broker_core::daemon_client::{query_list_agents, query_list_sessions, query_thread_status};
use clap::Args;

#[derive(Args, Debug)]
pub struct AgentsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct SessionsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ThreadArgs {
    /// The thread id to look up
    pub thread_id: String,
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub fn execute_agents(args: AgentsArgs) -> Result<()> {
    let Some(agents) = query_list_agents()? else {
        return report_unreachable(args.json);
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
        return Ok(());
    }

    if agents.is_empty() {
        println!("No agents registered.");
        return Ok(());
    }
    println!("{:<24} {:<24} last seen", "AGENT", "SESSION");
    for agent in agents {
        println!(
            "{:<24} {:<24} {}",
            agent.agent_id,
            agent.session_id.as_deref().unwrap_or("-"),
            agent.last_seen_at
        );
    }
    Ok(())
}

pub fn execute_sessions(args: SessionsArgs) -> Result<()> {
    let Some(sessions) = query_list_sessions()? else {
        return report_unreachable(args.json);
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!("No sessions known.");
        return Ok(());
    }
    println!("{:<24} {:<24} {:<10} agent", "SESSION", "SLUG", "ORIENTED");
    for session in sessions {
        println!(
            "{:<24} {:<24} {:<10} {}",
            session.session_id,
            session.slug.as_deref().unwrap_or("-"),
            session.oriented,
            session.agent_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

pub fn execute_thread(args: ThreadArgs) -> Result<()> {
    let status = query_thread_status(&args.thread_id)?;

    if args.json {
        match status {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("{{\"error\": \"unknown thread or daemon unreachable\"}}"),
        }
        return Ok(());
    }

    match status {
        Some(status) => {
            println!("Thread:      {}", status.thread_id);
            println!("Participants: {}", status.participants.join(", "));
            println!("Last active: {}", status.last_activity_at);
            println!("Closed:      {}", status.closed);
        }
        None => {
            println!("Unknown thread, or the daemon is not running: {}", args.thread_id);
            std::process::exit(1);
        }
    }
    Ok(())
}

fn report_unreachable(json: bool) -> Result<()> {
    if json {
        println!("{{\"error\": \"daemon unreachable\"}}");
    } else {
        eprintln!("Daemon unreachable. Is it running?");
    }
    std::process::exit(1);
}
