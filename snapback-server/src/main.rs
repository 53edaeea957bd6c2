// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use snapback_server::config::CoprocessorConfig;
use snapback_server::run_server;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "snapbackd", author, version, about = "snapback code-safety coprocessor")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "SNAPBACK_HTTP_ADDR")]
    http_addr: Option<String>,

    /// Workspace root (overrides config file)
    #[arg(long, env = "SNAPBACK_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Serve MCP over stdin/stdout instead of HTTP
    #[arg(long)]
    stdio: bool,

    /// Development mode: relaxed key rules, verbose errors
    #[arg(long)]
    development: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mut config = match CoprocessorConfig::load(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };
    if let Some(addr) = args.http_addr {
        config.server.listen_addr = addr;
    }
    if let Some(root) = args.workspace_root {
        config.workspace.root = Some(root);
    }
    if args.development {
        config.development = true;
    }

    match run_server(config, args.stdio).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::from(e.exit_code())
        }
    }
}
