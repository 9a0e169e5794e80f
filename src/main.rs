use clap::{Args, Parser, Subcommand};
use localchat::chat::ChatSession;
use localchat::inference::LlamaEngine;
use localchat::storage::huggingface::{fetch_model, format_size, FetchRequest, HuggingFaceUrl};
use localchat::storage::settings::{load_settings, repo_dir_name, save_settings, ChatSettings};
use localchat::types::{Device, HistoryMode};
use localchat::{logging, AppError};
use std::cell::Cell;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "localchat", version, about = "Chat with a local LLM from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a model repository from the HuggingFace Hub
    Fetch(FetchArgs),
    /// Start an interactive chat session
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Repository id (`owner/repo[@revision]`) or HuggingFace URL
    model_id: Option<String>,

    /// Destination directory (default: <models dir>/<repo name>)
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// Branch, tag or commit to fetch
    #[arg(long)]
    revision: Option<String>,

    /// Only fetch files matching this glob (repeatable)
    #[arg(long, short = 'i')]
    include: Vec<String>,

    /// Access token for gated repositories (default: $HF_TOKEN)
    #[arg(long)]
    token: Option<String>,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// GGUF file, or a directory holding exactly one
    #[arg(long, short = 'm')]
    model: Option<PathBuf>,

    #[arg(long, short = 'd', value_enum)]
    device: Option<Device>,

    /// Cap on generated tokens per turn
    #[arg(long)]
    max_new_tokens: Option<u32>,

    /// Who keeps the conversation context
    #[arg(long, value_enum)]
    history: Option<HistoryMode>,

    /// Print tokens as they are generated
    #[arg(long, short = 's', overrides_with = "no_stream")]
    stream: bool,

    /// Print each reply only once it is complete
    #[arg(long, overrides_with = "stream")]
    no_stream: bool,

    /// Pause between streamed tokens, for display only
    #[arg(long)]
    stream_delay_ms: Option<u64>,

    /// Context window in tokens
    #[arg(long)]
    context_size: Option<u32>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Persist these options as the new defaults
    #[arg(long)]
    save: bool,
}

impl ChatArgs {
    /// `--stream` / `--no-stream`, the last one given wins
    fn streaming(&self) -> Option<bool> {
        match (self.stream, self.no_stream) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    fn apply(&self, settings: &mut ChatSettings) {
        if let Some(model) = &self.model {
            settings.model_path = Some(model.clone());
        }
        if let Some(device) = self.device {
            settings.device = device;
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            settings.max_new_tokens = max_new_tokens;
        }
        if let Some(history) = self.history {
            settings.history_mode = history;
        }
        if let Some(streaming) = self.streaming() {
            settings.streaming = streaming;
        }
        if let Some(delay) = self.stream_delay_ms {
            settings.stream_delay_ms = delay;
        }
        if let Some(context_size) = self.context_size {
            settings.context_size = context_size;
        }
        if let Some(temperature) = self.temperature {
            settings.temperature = temperature;
        }
        settings.validate();
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing("warn") {
        eprintln!("warning: {}", e);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), AppError> {
    let settings = load_settings();
    match cli.command {
        Command::Fetch(args) => fetch(args, &settings),
        Command::Chat(args) => chat(args, settings),
    }
}

fn fetch(args: FetchArgs, settings: &ChatSettings) -> Result<(), AppError> {
    let (model_id, include) = match args.model_id {
        Some(id) => (id, args.include),
        None if args.include.is_empty() => (settings.default_repo.clone(), settings.default_include.clone()),
        None => (settings.default_repo.clone(), args.include),
    };

    let local_dir = match args.local_dir {
        Some(dir) => dir,
        None => {
            let parsed = HuggingFaceUrl::parse(&model_id)?;
            settings.models_directory.join(repo_dir_name(&parsed.repo_id))
        }
    };

    let request = FetchRequest::new(model_id, local_dir)
        .with_include(include)
        .with_revision(args.revision)
        .with_token(args.token);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let last_pct = Cell::new(u64::MAX);
    let summary = runtime.block_on(fetch_model(&request, |file, done, total| {
        if total == 0 {
            return;
        }
        let pct = done * 100 / total;
        if pct != last_pct.get() {
            last_pct.set(pct);
            eprint!("\r{}: {:>3}%", file, pct);
            if done >= total {
                eprintln!();
            }
        }
    }))?;

    println!(
        "Model files are in {} ({} downloaded, {}; {} already present)",
        summary.local_dir.display(),
        summary.downloaded.len(),
        format_size(summary.bytes_downloaded),
        summary.skipped.len()
    );
    Ok(())
}

fn chat(args: ChatArgs, mut settings: ChatSettings) -> Result<(), AppError> {
    args.apply(&mut settings);
    if args.save {
        save_settings(&settings)?;
    }

    let config = settings.chat_config();
    println!("Loading model on device: {}...", config.device);
    let engine = LlamaEngine::load(&config.model_path, settings.engine_options())?;
    println!("Model loaded and ready: {}", engine.model_info().name);

    let mut session = ChatSession::new(engine, config).with_generation_config(settings.generation_config());
    let stdin = io::stdin();
    let stdout = io::stdout();
    session.run(stdin.lock(), stdout.lock())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_args(args: &[&str]) -> ChatArgs {
        let cli = Cli::try_parse_from(["localchat", "chat"].iter().chain(args)).unwrap();
        match cli.command {
            Command::Chat(args) => args,
            Command::Fetch(_) => panic!("expected the chat subcommand"),
        }
    }

    #[test]
    fn test_no_stream_overrides_saved_setting() {
        let mut settings = ChatSettings {
            streaming: true,
            ..ChatSettings::default()
        };
        chat_args(&["--no-stream"]).apply(&mut settings);
        assert!(!settings.streaming);

        chat_args(&["--stream"]).apply(&mut settings);
        assert!(settings.streaming);

        chat_args(&[]).apply(&mut settings);
        assert!(settings.streaming);
    }

    #[test]
    fn test_last_stream_flag_wins() {
        assert_eq!(chat_args(&["--stream", "--no-stream"]).streaming(), Some(false));
        assert_eq!(chat_args(&["--no-stream", "-s"]).streaming(), Some(true));
        assert_eq!(chat_args(&[]).streaming(), None);
    }

    #[test]
    fn test_token_cap_flag_reaches_chat_config() {
        let mut settings = ChatSettings::default();
        chat_args(&["--max-new-tokens", "20000", "--device", "cpu"]).apply(&mut settings);
        assert_eq!(settings.chat_config().max_new_tokens, 20000);
        assert_eq!(settings.device, Device::Cpu);
    }
}
