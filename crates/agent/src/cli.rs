use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "antidote-agent",
    version,
    about = "On-host agent maintaining an authenticated control channel to the orchestrator"
)]
pub struct Args {
    /// Agent token used during the auth handshake.
    #[arg(long, env = "ANTIDOTE_TOKEN")]
    pub token: Option<String>,

    /// WebSocket endpoint of the orchestrator, e.g. wss://orchestrator.example.com/agent.
    #[arg(long, env = "ANTIDOTE_ENDPOINT")]
    pub endpoint: Option<String>,
}
