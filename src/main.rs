mod drivetrain;
mod net;
mod physics;
mod state;
mod suspension;

use crate::net::start_websocket_server;
use crate::physics::PhysicsWorld;
use crate::state::SharedGameState;

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration};
use tracing::info;

// Fixed simulation timestep: 50 Hz.
const TICK_MS: u64 = 20;
const DT: f32 = TICK_MS as f32 / 1000.0;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    info!("starting dynamics server");

    let state = Arc::new(Mutex::new(SharedGameState::new()));
    let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

    // Input and telemetry go over WebSocket; the loop below never blocks on it.
    tokio::spawn(start_websocket_server(
        Arc::clone(&state),
        Arc::clone(&physics),
    ));

    let mut ticker = interval(Duration::from_millis(TICK_MS));

    loop {
        ticker.tick().await;

        let mut phys = physics.lock().await;
        let mut game = state.lock().await;

        phys.step(DT);

        game.tick += 1;
        game.broadcast_snapshot(&phys);
    }
}
