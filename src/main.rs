use anyhow::{Context, Result};
use hanashi::content::ContentStore;
use hanashi::game::SessionConfig;
use hanashi::terminal::Terminal;

const USAGE: &str = "\
Usage: hanashi [scenario-id | list] [max_health] [max_hints]

Example:
  hanashi airport-immigration 100 3

Scenarios are read from $HANASHI_CONTENT_DIR when set, otherwise the
built-in set is used.

Logging: set RUST_LOG=info or RUST_LOG=debug for verbose output";

fn load_store() -> Result<ContentStore> {
    match std::env::var_os("HANASHI_CONTENT_DIR") {
        Some(dir) => ContentStore::from_dir(&dir)
            .with_context(|| format!("failed to load scenarios from {}", dir.to_string_lossy())),
        None => ContentStore::builtin().context("built-in scenarios are invalid"),
    }
}

fn session_config(args: &[String]) -> Result<SessionConfig> {
    let defaults = SessionConfig::default();
    let config = SessionConfig {
        max_health: args
            .first()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_health),
        max_hints: args
            .get(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_hints),
    };
    anyhow::ensure!(config.max_health > 0, "max_health must be at least 1\n\n{USAGE}");
    Ok(config)
}

fn main() -> Result<()> {
    // Initialize logging. Control verbosity with RUST_LOG env var:
    //   RUST_LOG=info   hanashi   # scenario loads + transitions + round results
    //   RUST_LOG=debug  hanashi   # + damage, milestones and hints
    //   RUST_LOG=trace  hanashi remote ...   # + full rendered prompt template
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp_millis()
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let store = load_store()?;

    match args.first().map(String::as_str) {
        Some("-h" | "--help" | "help") => {
            println!("{USAGE}");
            Ok(())
        }
        Some("list") => {
            for s in store.scenarios() {
                println!("{:<22} {:?}\t{} {}", s.id, s.difficulty, s.name, s.native_name);
            }
            Ok(())
        }
        #[cfg(feature = "llm")]
        Some("remote") => remote::run(&store, &args[1..]),
        Some(id) => Terminal::stdio().run(&store, session_config(&args[1..])?, Some(id)),
        None => Terminal::stdio().run(&store, SessionConfig::default(), None),
    }
}

#[cfg(feature = "llm")]
mod remote {
    use anyhow::{Context, Result};
    use hanashi::content::ContentStore;
    use hanashi::llm::{ModelConfig, LLM};
    use hanashi::terminal::Terminal;

    const USAGE: &str = "\
Usage: hanashi remote <path-to-model.gguf> <scenario-id> [gpu_layers] [context_size] [max_tokens]

Example:
  hanashi remote ./models/qwen2.5-3b-instruct-q4_k_m.gguf izakaya 99 8092 1024";

    pub fn run(store: &ContentStore, args: &[String]) -> Result<()> {
        let model_path = args.first().context(USAGE)?;
        let scenario_id = args.get(1).context(USAGE)?;
        let scenario = store
            .scenario(scenario_id)
            .with_context(|| format!("cannot start scenario '{scenario_id}'"))?;

        let defaults = ModelConfig::default();
        let config = ModelConfig {
            n_gpu_layers: args.get(2).and_then(|s| s.parse().ok()).unwrap_or(defaults.n_gpu_layers),
            n_ctx: args.get(3).and_then(|s| s.parse().ok()).unwrap_or(defaults.n_ctx),
            max_tokens: args.get(4).and_then(|s| s.parse().ok()).unwrap_or(defaults.max_tokens),
        };

        println!("Loading model: {model_path}");
        println!("  GPU layers : {}", config.n_gpu_layers);
        println!("  Context    : {}", config.n_ctx);
        println!("  Max tokens : {}", config.max_tokens);

        let mut model = LLM::load_model(model_path, config).context("failed to load model")?;
        Terminal::stdio().run_remote(&mut model, scenario)
    }
}
