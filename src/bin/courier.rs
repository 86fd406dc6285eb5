use std::path::PathBuf;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use tracing::info;

use courier::{setup_tracing, Agent, AgentConfig, AppResult};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory of the rolling log files
    #[arg(long, default_value = "./logs")]
    pub log_dir: PathBuf,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// run the agent (default)
    Serve,
    /// print the effective configuration and exit
    PrintConfig,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline: CommandLine = CommandLine::parse();
    let level = match commandline.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    //setup config
    let config_path = commandline
        .conf
        .as_ref()
        .map_or_else(|| PathBuf::from("./conf.toml"), PathBuf::from);
    let agent_config = if config_path.exists() {
        AgentConfig::set_up_config(&config_path)?
    } else {
        AgentConfig::default()
    };

    match commandline.command.unwrap_or(Command::Serve) {
        Command::PrintConfig => {
            println!("{:#?}", agent_config);
            Ok(())
        }
        Command::Serve => {
            let _log_guard = setup_tracing(&commandline.log_dir, level);
            info!(
                "starting agent {} on {}",
                agent_config.general.agent_name,
                agent_config.listen_address()
            );
            Agent::new(agent_config).start()
        }
    }
}
