use std::io;
use std::sync::Arc;

use coding_agent::harnesses;
use coding_agent::transcript;
use coding_agent::turn::run_turn;
use session_store::{MemoryStore, Store};
use session_stream::{logging, CreateSessionParams, DemuxOptions, EnvConfig, SessionLifecycle};

#[tokio::main(flavor = "current_thread")]
async fn main() -> io::Result<()> {
    logging::init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "usage: coding_agent <prompt>",
        ));
    }

    let config = EnvConfig::from_env();
    let selected = harnesses::harness_from_env().map_err(io::Error::other)?;
    let cwd = std::env::current_dir()?;
    let store = Arc::new(MemoryStore::new());
    let lifecycle = SessionLifecycle::new(Arc::clone(&store) as Arc<dyn Store>);

    let outcome = run_turn(
        &selected,
        Arc::clone(&store),
        &lifecycle,
        DemuxOptions::from_config(&config),
        CreateSessionParams::new(cwd.display().to_string()),
        prompt,
    )
    .await
    .map_err(io::Error::other)?;

    print!("{}", transcript::render(&outcome.messages));
    tracing::info!(
        session_id = %outcome.session.id,
        harness = selected.id(),
        stop_reason = ?outcome.stop_reason,
        "turn finished"
    );
    Ok(())
}
