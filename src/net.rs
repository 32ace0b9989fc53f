use std::sync::Arc;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{info, warn};

use crate::physics::PhysicsWorld;
use crate::state::SharedGameState;

#[derive(Debug)]
struct ClientMessage {
    msg_type: String,
    drive: f32, // -1..1 forward/back axis
    steer: f32, // -1..1
    brake: f32, // 0..1
}

impl ClientMessage {
    fn from_json(txt: &str) -> Option<Self> {
        let v = serde_json::from_str::<serde_json::Value>(txt).ok()?;

        Some(ClientMessage {
            msg_type: v.get("type")?.as_str()?.to_string(),
            drive: v.get("drive").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            steer: v.get("steer").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
            brake: v.get("brake").and_then(|x| x.as_f64()).unwrap_or(0.0) as f32,
        })
    }
}

/// Create the entity and its vehicle for a new connection. The tick loop
/// holds physics and state together (physics first), so the two locks here
/// are taken one at a time, never nested: nesting them in the opposite
/// order would deadlock the server.
async fn register_player(
    state: &Arc<Mutex<SharedGameState>>,
    physics: &Arc<Mutex<PhysicsWorld>>,
) -> String {
    let id = state.lock().await.add_entity();
    physics
        .lock()
        .await
        .spawn_vehicle_for_player(id.clone(), [0.0, 0.0, 0.0]);
    id
}

pub async fn start_websocket_server(
    state: Arc<Mutex<SharedGameState>>,
    physics: Arc<Mutex<PhysicsWorld>>,
) {
    let listener = TcpListener::bind("0.0.0.0:9001")
        .await
        .expect("Failed to bind WebSocket port");

    info!("WebSocket listening on ws://localhost:9001");

    loop {
        let raw = match listener.accept().await {
            Ok((raw, _)) => raw,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let state_clone = Arc::clone(&state);
        let physics_clone = Arc::clone(&physics);

        tokio::spawn(async move {
            let ws = match accept_async(raw).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!(error = %e, "websocket handshake failed");
                    return;
                }
            };
            let (mut write, mut read) = ws.split();

            // -------------------------------
            // 1) Outgoing message channel
            // -------------------------------
            let (tx, mut rx) = mpsc::unbounded_channel::<String>();

            {
                let mut game = state_clone.lock().await;
                game.register_client(tx.clone());
            }

            // -------------------------------
            // 2) Send-loop task
            // -------------------------------
            tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    if write.send(Message::Text(msg)).await.is_err() {
                        break;
                    }
                }
            });

            // -------------------------------
            // 3) Entity + vehicle spawn
            // -------------------------------
            let player_id = register_player(&state_clone, &physics_clone).await;

            info!(player_id = %player_id, "player connected");

            let welcome = format!(r#"{{"type":"welcome","player_id":"{}"}}"#, player_id);
            let _ = tx.send(welcome);

            // -------------------------------
            // 4) Receive loop
            // -------------------------------
            while let Some(msg) = read.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(_) => break,
                };

                if !msg.is_text() {
                    continue;
                }
                let text = match msg.to_text() {
                    Ok(t) => t,
                    Err(_) => continue,
                };

                if text.contains("\"type\":\"ping\"") {
                    let _ = tx.send("{\"type\":\"pong\"}".into());
                    continue;
                }

                let parsed = match ClientMessage::from_json(text) {
                    Some(v) => v,
                    None => continue,
                };

                if parsed.msg_type == "input" {
                    let mut phys = physics_clone.lock().await;
                    phys.apply_player_input(&player_id, parsed.drive, parsed.steer, parsed.brake);
                }
            }

            info!(player_id = %player_id, "player disconnected");
            {
                let mut game = state_clone.lock().await;
                game.remove_entity(&player_id);
            }
            {
                let mut phys = physics_clone.lock().await;
                phys.despawn_vehicle(&player_id);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_message_parses_all_axes() {
        let msg = ClientMessage::from_json(
            r#"{"type":"input","drive":0.8,"steer":-0.5,"brake":0.2}"#,
        )
        .expect("valid input must parse");
        assert_eq!(msg.msg_type, "input");
        assert_eq!(msg.drive, 0.8);
        assert_eq!(msg.steer, -0.5);
        assert_eq!(msg.brake, 0.2);
    }

    #[test]
    fn missing_axes_default_to_zero() {
        let msg = ClientMessage::from_json(r#"{"type":"input"}"#).unwrap();
        assert_eq!(msg.drive, 0.0);
        assert_eq!(msg.steer, 0.0);
        assert_eq!(msg.brake, 0.0);
    }

    #[test]
    fn garbage_and_typeless_messages_are_rejected() {
        assert!(ClientMessage::from_json("not json").is_none());
        assert!(ClientMessage::from_json(r#"{"drive":1.0}"#).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connects_do_not_deadlock_against_the_tick_loop() {
        let state = Arc::new(Mutex::new(SharedGameState::new()));
        let physics = Arc::new(Mutex::new(PhysicsWorld::new()));

        // The tick loop's order: physics first, then state, held together.
        let ticker = {
            let state = Arc::clone(&state);
            let physics = Arc::clone(&physics);
            tokio::spawn(async move {
                for _ in 0..200 {
                    {
                        let mut phys = physics.lock().await;
                        let mut game = state.lock().await;
                        phys.step(0.02);
                        game.tick += 1;
                        game.broadcast_snapshot(&phys);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        // Connections land mid-tick and must never wedge the loop.
        let joins = {
            let state = Arc::clone(&state);
            let physics = Arc::clone(&physics);
            tokio::spawn(async move {
                for _ in 0..50 {
                    register_player(&state, &physics).await;
                    tokio::task::yield_now().await;
                }
            })
        };

        tokio::time::timeout(std::time::Duration::from_secs(10), async {
            ticker.await.unwrap();
            joins.await.unwrap();
        })
        .await
        .expect("connection setup must not deadlock the tick loop");

        assert_eq!(state.lock().await.entities.len(), 50);
        assert_eq!(physics.lock().await.vehicles.len(), 50);
    }
}
