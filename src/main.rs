use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use dialoguer::Input;

use groupchat_rt::orchestrator::config::HumanInTheLoopConfig;
use groupchat_rt::orchestrator::orchestration::AgentResponseCallback;
use groupchat_rt::{
    Agent, ChatHistory, ChatMessageContent, GroupChatConfig, GroupChatManager, GroupChatOrchestration,
    HumanInTheLoopGroupChatManager, HumanResponseFunction, InProcessRuntime, RoundRobinGroupChatManager,
    ScriptedAgent,
};

/// Scripted group chat demo
#[derive(Parser, Debug)]
#[command(name = "groupchat-demo")]
#[command(about = "Runs a scripted group chat from a YAML configuration")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ask for human feedback on the terminal
    #[arg(short, long)]
    interactive: bool,
}

fn human_response_function(hitl: &HumanInTheLoopConfig, interactive: bool) -> HumanResponseFunction {
    if interactive {
        return HumanResponseFunction::from_async(|_history: ChatHistory| async {
            let reply = tokio::task::spawn_blocking(|| {
                Input::<String>::new()
                    .with_prompt("Your feedback")
                    .interact_text()
            })
            .await
            .context("input task failed")?
            .context("failed to read feedback")?;
            Ok::<_, anyhow::Error>(ChatMessageContent::user(reply))
        });
    }

    // Non-interactive runs approve on the second review.
    let keyword = hitl.approval_keyword.clone();
    HumanResponseFunction::from_sync(move |history: ChatHistory| {
        let reviews = history
            .messages()
            .iter()
            .filter(|m| m.name.as_deref() == Some("human"))
            .count();
        let reply = if reviews == 0 {
            "Make it shorter.".to_string()
        } else {
            format!("{keyword}, looks great.")
        };
        Ok(ChatMessageContent::user(reply).with_name("human"))
    })
}

fn print_message(message: &ChatMessageContent) {
    let speaker = message.name.as_deref().unwrap_or("user");
    println!("{} {}", format!("{speaker}:").bold().cyan(), message.to_text());
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = GroupChatConfig::load(args.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_max_level(config.tracing_level()?)
        .with_target(false)
        .init();

    let members: Vec<Arc<dyn Agent>> = config
        .participants
        .iter()
        .map(|p| {
            let agent = ScriptedAgent::new(&p.name, p.description.as_deref().unwrap_or_default())
                .with_replies(p.replies.clone());
            Arc::new(agent) as Arc<dyn Agent>
        })
        .collect();

    let manager: Arc<dyn GroupChatManager> = match &config.human_in_the_loop {
        Some(hitl) => Arc::new(HumanInTheLoopGroupChatManager::new(
            config.max_rounds,
            &hitl.after_agent,
            &hitl.approval_keyword,
            human_response_function(hitl, args.interactive),
        )),
        None => Arc::new(RoundRobinGroupChatManager::new(config.max_rounds)),
    };

    let on_response: AgentResponseCallback = Arc::new(print_message);
    let orchestration = GroupChatOrchestration::new(members, manager)?.with_agent_response_callback(on_response);

    println!("{} {}", "Task:".bold().yellow(), config.task);
    let runtime = InProcessRuntime::new();
    let result = orchestration.invoke(config.task.as_str(), runtime.as_core()).await?;

    let outcome = result.get(config.result_timeout()).await;
    runtime.stop().await?;

    let message = outcome.context("group chat did not finish")?;
    println!();
    println!("{} {}", "Result:".bold().green(), message.to_text());
    if let Some(reason) = message.metadata_str("termination_reason") {
        println!("{} {}", "Stopped because:".dimmed(), reason);
    }
    Ok(())
}
