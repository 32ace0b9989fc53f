use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::physics::PhysicsWorld;

pub struct Entity {
    pub id: String,
    pub joined_at_tick: u64,
}

#[derive(Serialize)]
pub struct WheelSnapshot {
    pub id: &'static str, // "FL", "FR", "RL", "RR"
    pub grounded: bool,
    pub compression: f32, // 0..1
}

#[derive(Serialize)]
pub struct VehicleSnapshot {
    pub id: String,
    pub position: [f32; 3],
    pub rotation: [f32; 4], // quaternion (i, j, k, w)
    pub speed_ms: f32,      // speed magnitude; direction is in the gear/rotation
    pub speed_kmh: f32,
    pub rpm: f32,
    pub gear: String, // "R", "N", "1".."5"
    pub steer_deg: f32,
    pub steer_rad: f32,
    pub traction: f32, // 0..1
    pub wheels: Vec<WheelSnapshot>,
}

#[derive(Serialize)]
pub struct Snapshot {
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub tick: u64,
    pub vehicles: Vec<VehicleSnapshot>,
}

pub struct SharedGameState {
    pub tick: u64,
    pub clients: Vec<UnboundedSender<String>>,
    pub entities: HashMap<String, Entity>,
}

impl SharedGameState {
    pub fn new() -> Self {
        Self {
            tick: 0,
            clients: Vec::new(),
            entities: HashMap::new(),
        }
    }

    pub fn register_client(&mut self, tx: UnboundedSender<String>) {
        self.clients.push(tx);
    }

    pub fn add_entity(&mut self) -> String {
        let id = Uuid::new_v4().to_string();
        self.entities.insert(
            id.clone(),
            Entity { id: id.clone(), joined_at_tick: self.tick },
        );
        id
    }

    pub fn remove_entity(&mut self, id: &str) {
        self.entities.remove(id);
    }

    /// Build one snapshot of every vehicle and send it to all clients.
    /// Senders whose receive side is gone are dropped on the way.
    pub fn broadcast_snapshot(&mut self, phys: &PhysicsWorld) {
        let mut vehicles = Vec::with_capacity(phys.vehicles.len());

        for (id, vehicle) in &phys.vehicles {
            let Some(body) = phys.bodies.get(vehicle.body) else { continue };

            let pos = body.position();
            let rot = pos.rotation;
            let forward = rot * rapier3d::prelude::vector![0.0, 0.0, 1.0];
            let speed_ms = body.linvel().dot(&forward).abs();

            let wheels = vehicle
                .wheels
                .iter()
                .map(|w| WheelSnapshot {
                    id: w.corner.as_str(),
                    grounded: w.suspension.state.grounded,
                    compression: w.suspension.state.last_compression,
                })
                .collect();

            vehicles.push(VehicleSnapshot {
                id: id.clone(),
                position: pos.translation.vector.into(),
                rotation: [rot.i, rot.j, rot.k, rot.w],
                speed_ms,
                speed_kmh: speed_ms * 3.6,
                rpm: vehicle.controller.rpm_display(),
                gear: vehicle.controller.gear_display(),
                steer_deg: vehicle.controller.steer_angle_deg(),
                steer_rad: vehicle.controller.steer_angle(),
                traction: vehicle.controller.traction(),
                wheels,
            });
        }

        let json = serde_json::to_string(&Snapshot {
            msg_type: "snapshot",
            tick: self.tick,
            vehicles,
        })
        .unwrap();

        self.clients.retain(|tx| tx.send(json.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entities_get_unique_ids() {
        let mut state = SharedGameState::new();
        let a = state.add_entity();
        let b = state.add_entity();
        assert_ne!(a, b);
        assert_eq!(state.entities.len(), 2);

        state.remove_entity(&a);
        assert_eq!(state.entities.len(), 1);
        assert!(state.entities.contains_key(&b));
    }

    #[test]
    fn snapshot_carries_vehicle_telemetry() {
        let mut state = SharedGameState::new();
        let mut phys = PhysicsWorld::new();
        let id = state.add_entity();
        phys.spawn_vehicle_for_player(id.clone(), [0.0, 0.0, 0.0]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.register_client(tx);
        state.tick = 42;
        state.broadcast_snapshot(&phys);

        let msg = rx.try_recv().expect("snapshot must be sent");
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(v["type"], "snapshot");
        assert_eq!(v["tick"], 42);
        assert_eq!(v["vehicles"][0]["id"], id.as_str());
        assert_eq!(v["vehicles"][0]["gear"], "N");
        assert_eq!(v["vehicles"][0]["wheels"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn snapshot_speed_is_reported_as_magnitude() {
        let mut state = SharedGameState::new();
        let mut phys = PhysicsWorld::new();
        let id = state.add_entity();
        phys.spawn_vehicle_for_player(id.clone(), [0.0, 0.0, 0.0]);

        // Rolling backward at 5 m/s.
        let handle = phys.vehicles[&id].body;
        if let Some(body) = phys.bodies.get_mut(handle) {
            body.set_linvel(rapier3d::prelude::vector![0.0, 0.0, -5.0], true);
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        state.register_client(tx);
        state.broadcast_snapshot(&phys);

        let msg = rx.try_recv().unwrap();
        let v: serde_json::Value = serde_json::from_str(&msg).unwrap();
        let ms = v["vehicles"][0]["speed_ms"].as_f64().unwrap();
        let kmh = v["vehicles"][0]["speed_kmh"].as_f64().unwrap();
        assert!((ms - 5.0).abs() < 1e-3, "speed must be the magnitude, got {ms}");
        assert!((kmh - 18.0).abs() < 1e-2);
    }

    #[test]
    fn dead_clients_are_pruned_on_broadcast() {
        let mut state = SharedGameState::new();
        let phys = PhysicsWorld::new();

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        state.register_client(tx);
        drop(rx);
        state.broadcast_snapshot(&phys);
        assert!(state.clients.is_empty());
    }
}
