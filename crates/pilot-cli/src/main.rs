//! pilot: a terminal-resident AI coding agent

mod commands;
mod config;
mod ui;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use pilot_agent::{Agent, Ui};
use pilot_ai::providers::{AnthropicClient, OpenAiClient};
use pilot_ai::LlmClient;
use pilot_tools::Registry;
use tokio_util::sync::CancellationToken;

use commands::Command;
use config::Config;
use ui::{read_line_blocking, Terminal};

/// pilot - AI coding agent for the terminal
#[derive(Parser, Debug)]
#[command(name = "pilot", disable_version_flag = true)]
struct Args {
    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// Override the active model
    #[arg(short, long)]
    model: Option<String>,

    /// Provider to use (openai, anthropic)
    #[arg(short, long, default_value = "")]
    provider: String,

    /// Verbose logging
    #[arg(long)]
    verbose: bool,
}

/// State shared with the Ctrl+C handler
struct SignalState {
    run_cancel: Option<CancellationToken>,
    last_interrupt: Option<Instant>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.version {
        println!("pilot {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    if args.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("pilot=debug")
            .init();
    }

    let mut cfg = match Config::load(&args.provider) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(model) = args.model {
        let (base_url, max_tokens, context_window) = config::provider_defaults(&cfg.provider, &model);
        cfg.model = model;
        cfg.base_url = base_url;
        cfg.max_tokens = max_tokens;
        cfg.context_window = context_window;
    }

    let work_dir = std::env::current_dir().context("get working directory")?;

    let client = new_client(&cfg);
    let registry = Registry::builtin(&work_dir);
    let mut agent = Agent::new(client, registry, &work_dir, cfg.context_window);

    let terminal = Terminal::new();
    terminal.print_banner(
        &cfg.model,
        &work_dir.display().to_string(),
        env!("CARGO_PKG_VERSION"),
    );

    let mut current_model = cfg.model.clone();
    let mut current_provider = cfg.provider.clone();

    // First Ctrl+C cancels the running turn; a second within 2 seconds of
    // the first (while idle) exits.
    let signal_state = Arc::new(Mutex::new(SignalState {
        run_cancel: None,
        last_interrupt: None,
    }));
    {
        let state = signal_state.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                let mut state = state.lock();
                let now = Instant::now();
                let double_tap = state
                    .last_interrupt
                    .is_some_and(|last| now.duration_since(last) < Duration::from_secs(2));
                state.last_interrupt = Some(now);

                if let Some(cancel) = &state.run_cancel {
                    cancel.cancel();
                } else if double_tap {
                    println!("\nExiting.");
                    std::process::exit(0);
                } else {
                    println!();
                }
            }
        });
    }

    loop {
        terminal.print_prompt();
        let Some(line) = read_line_blocking().await else {
            // EOF (Ctrl+D)
            break;
        };
        let input = line.trim().to_string();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = commands::parse(&input) {
            match command {
                Command::Help => {
                    terminal.print_help();
                    if let Ok(dir) = pilot_agent::sessions_dir(&work_dir) {
                        println!("  Sessions stored at: {}\n", dir.display());
                    }
                }
                Command::Model => {
                    handle_model_switch(
                        &terminal,
                        &mut agent,
                        &mut current_model,
                        &mut current_provider,
                    )
                    .await;
                }
                Command::Compact => {
                    agent.compact(&CancellationToken::new(), terminal.as_ref()).await;
                    if let Err(e) = agent.save_session() {
                        terminal.print_warning(&format!("Session save failed: {}", e));
                    }
                }
                Command::Clear => agent.clear(terminal.as_ref()),
                Command::Context => terminal.print_context_usage(&agent.context_usage()),
                Command::Tasks => println!("{}", agent.task_summary()),
                Command::Resume => handle_resume(&terminal, &mut agent).await,
                Command::Rewind => handle_rewind(&terminal, &mut agent).await,
                Command::Quit => break,
                Command::Unknown(name) => {
                    println!("Unknown command: /{}", name);
                    println!("Type /help for available commands.");
                }
            }
            continue;
        }

        let run_cancel = CancellationToken::new();
        signal_state.lock().run_cancel = Some(run_cancel.clone());

        let result = agent.run(&input, terminal.clone(), run_cancel.clone()).await;

        signal_state.lock().run_cancel = None;

        match result {
            Ok(()) => {}
            Err(e) if e.is_cancelled() || run_cancel.is_cancelled() => {
                println!("Operation cancelled.");
                println!();
            }
            Err(e) => terminal.print_error(&e),
        }

        if let Err(e) = agent.save_session() {
            terminal.print_warning(&format!("Session save failed: {}", e));
        }
    }

    Ok(())
}

fn new_client(cfg: &Config) -> Arc<dyn LlmClient> {
    match cfg.provider.as_str() {
        "anthropic" => Arc::new(AnthropicClient::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            &cfg.base_url,
        )),
        _ => Arc::new(OpenAiClient::new(
            &cfg.api_key,
            &cfg.model,
            cfg.max_tokens,
            &cfg.base_url,
        )),
    }
}

async fn handle_model_switch(
    terminal: &Terminal,
    agent: &mut Agent,
    current_model: &mut String,
    current_provider: &mut String,
) {
    let models = config::known_models();
    println!("Models:");
    println!("  0. Custom model...");
    for (i, model) in models.iter().enumerate() {
        let marker = if model.model == current_model.as_str() {
            " (current)"
        } else {
            ""
        };
        println!("  {}. {}{}", i + 1, model.label, marker);
    }

    print!("Choice: ");
    use std::io::Write as _;
    std::io::stdout().flush().ok();
    let Some(choice) = read_line_blocking().await else {
        return;
    };
    let choice = choice.trim();
    if choice.is_empty() {
        return;
    }

    let (selected_model, selected_provider) = match choice.parse::<usize>() {
        Ok(0) => {
            println!("Provider: 1. openai  2. anthropic  (Enter for {})", current_provider);
            print!("Provider: ");
            std::io::stdout().flush().ok();
            let Some(p) = read_line_blocking().await else {
                return;
            };
            let provider = match p.trim() {
                "1" => "openai".to_string(),
                "2" => "anthropic".to_string(),
                "" => current_provider.clone(),
                _ => {
                    terminal.print_warning("Invalid choice.");
                    return;
                }
            };

            print!("Model name: ");
            std::io::stdout().flush().ok();
            let Some(custom) = read_line_blocking().await else {
                return;
            };
            let custom = custom.trim().to_string();
            if custom.is_empty() {
                return;
            }
            (custom, provider)
        }
        Ok(n) if n >= 1 && n <= models.len() => (
            models[n - 1].model.to_string(),
            models[n - 1].provider.to_string(),
        ),
        _ => {
            terminal.print_warning("Invalid choice.");
            return;
        }
    };

    if selected_model == *current_model {
        terminal.print_warning(&format!("Already using {}.", selected_model));
        return;
    }

    let api_key = config::api_key_for_provider(&selected_provider);
    if api_key.is_empty() {
        terminal.print_warning(&format!(
            "No API key found for {}. Set the environment variable or add it to credentials.",
            selected_provider
        ));
        return;
    }

    let (base_url, max_tokens, context_window) =
        config::provider_defaults(&selected_provider, &selected_model);
    let cfg = Config {
        provider: selected_provider.clone(),
        api_key,
        model: selected_model.clone(),
        max_tokens,
        base_url,
        context_window,
    };
    agent.set_client(new_client(&cfg), context_window);
    *current_model = selected_model;
    *current_provider = selected_provider;

    terminal.print_model_switch(current_model);
}

async fn handle_resume(terminal: &Terminal, agent: &mut Agent) {
    let sessions = match pilot_agent::list_sessions(agent.work_dir(), 10) {
        Ok(sessions) => sessions,
        Err(e) => {
            terminal.print_error(&format!("list sessions: {}", e));
            return;
        }
    };
    if sessions.is_empty() {
        terminal.print_warning("No saved sessions found.");
        return;
    }

    terminal.print_session_list(&sessions);

    print!("Choice: ");
    use std::io::Write as _;
    std::io::stdout().flush().ok();
    let Some(choice) = read_line_blocking().await else {
        return;
    };
    let choice = choice.trim();
    if choice.is_empty() {
        return;
    }
    let selected = match choice.parse::<usize>() {
        Ok(n) if n >= 1 && n <= sessions.len() => &sessions[n - 1],
        _ => {
            terminal.print_warning("Invalid choice.");
            return;
        }
    };

    if let Err(e) = agent.resume_session(&selected.id) {
        terminal.print_error(&format!("resume session: {}", e));
        return;
    }

    terminal.print_conversation_history(agent.messages());
    terminal.print_session_resumed(selected.msg_count, &selected.preview);
}

async fn handle_rewind(terminal: &Terminal, agent: &mut Agent) {
    let items = agent.checkpoints();
    if items.is_empty() {
        terminal.print_warning(
            "No checkpoints available. Checkpoints are created at the start of each turn.",
        );
        return;
    }

    terminal.print_checkpoint_list(&items);

    print!("Checkpoint number: ");
    use std::io::Write as _;
    std::io::stdout().flush().ok();
    let Some(choice) = read_line_blocking().await else {
        return;
    };
    let turn = match choice.trim().parse::<usize>() {
        Ok(n) if n >= 1 && n <= items.len() => n,
        _ => {
            terminal.print_warning("Invalid checkpoint number.");
            return;
        }
    };

    terminal.print_rewind_actions();
    print!("Action: ");
    std::io::stdout().flush().ok();
    let Some(action) = read_line_blocking().await else {
        return;
    };

    match action.trim() {
        "1" => match agent.rewind_all(turn) {
            Ok(()) => {
                terminal.print_conversation_history(agent.messages());
                println!("Rewound: restored code and conversation.");
            }
            Err(e) => terminal.print_error(&e),
        },
        "2" => {
            agent.rewind_conversation(turn);
            terminal.print_conversation_history(agent.messages());
            println!("Rewound: restored conversation only.");
        }
        "3" => match agent.rewind_code(turn) {
            Ok(()) => println!("Rewound: restored code only."),
            Err(e) => terminal.print_error(&e),
        },
        "4" => {
            let cancel = CancellationToken::new();
            match agent.summarize_from(&cancel, turn, terminal).await {
                Ok(()) => terminal.print_conversation_history(agent.messages()),
                Err(e) => terminal.print_error(&e),
            }
        }
        "5" => {}
        _ => terminal.print_warning("Invalid action."),
    }
}
