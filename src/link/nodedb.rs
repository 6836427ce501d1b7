//! In-memory registry of mesh nodes known to this connection.
//!
//! Populated from the node-database sync and kept fresh by packets observed
//! afterwards. Owned by the connection's read path; presentation layers get
//! clones via [`NodeDatabase::snapshot`]. Cleared whenever a new connection
//! starts, since a fresh handshake invalidates prior state.
use std::collections::HashMap;

use serde::Serialize;

use crate::proto;

/// Last known GPS fix for a node, fixed-point 1e-7 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodePosition {
    pub latitude_i: i32,
    pub longitude_i: i32,
    pub altitude: Option<i32>,
    pub time: u32,
}

impl NodePosition {
    pub fn latitude_deg(&self) -> f64 {
        self.latitude_i as f64 * 1e-7
    }

    pub fn longitude_deg(&self) -> f64 {
        self.longitude_i as f64 * 1e-7
    }
}

/// Battery/utilization metrics for a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NodeMetrics {
    pub battery_pct: Option<u32>,
    pub voltage: Option<f32>,
    pub channel_util: Option<f32>,
    pub air_util_tx: Option<f32>,
}

/// One known mesh node. Identity is `node_num`; everything else merges as
/// updates arrive (only supplied fields overwrite).
#[derive(Debug, Clone, Serialize)]
pub struct RadioNode {
    pub node_num: u32,
    pub long_name: String,
    pub short_name: String,
    pub user_id: String,
    pub position: Option<NodePosition>,
    pub device_metrics: Option<NodeMetrics>,
    pub last_heard_epoch_s: u32,
    pub snr: f32,
}

impl RadioNode {
    fn new(node_num: u32) -> Self {
        Self {
            node_num,
            long_name: String::new(),
            short_name: String::new(),
            user_id: String::new(),
            position: None,
            device_metrics: None,
            last_heard_epoch_s: 0,
            snr: 0.0,
        }
    }

    /// First non-empty of long name, short name, user id; hex fallback.
    pub fn display_name(&self) -> String {
        for name in [&self.long_name, &self.short_name, &self.user_id] {
            let trimmed = name.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        format!("0x{:06X}", self.node_num & 0xFFFFFF)
    }

    fn merge_user(&mut self, user: &proto::User) {
        if !user.long_name.trim().is_empty() {
            self.long_name = user.long_name.clone();
        }
        if !user.short_name.trim().is_empty() {
            self.short_name = user.short_name.clone();
        }
        if !user.id.trim().is_empty() {
            self.user_id = user.id.clone();
        }
    }

    fn merge_position(&mut self, pos: &proto::Position) {
        if let (Some(lat), Some(lon)) = (pos.latitude_i, pos.longitude_i) {
            self.position = Some(NodePosition {
                latitude_i: lat,
                longitude_i: lon,
                altitude: pos.altitude,
                time: pos.time.unwrap_or(0),
            });
        }
    }

    fn merge_metrics(&mut self, dm: &proto::DeviceMetrics) {
        self.device_metrics = Some(NodeMetrics {
            battery_pct: dm.battery_level,
            voltage: dm.voltage,
            channel_util: dm.channel_utilization,
            air_util_tx: dm.air_util_tx,
        });
    }
}

/// Registry of [`RadioNode`]s keyed by node number.
#[derive(Debug, Default)]
pub struct NodeDatabase {
    nodes: HashMap<u32, RadioNode>,
}

impl NodeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a NodeInfo record, creating the node on first sight. Returns a
    /// clone of the updated entry for event emission.
    pub fn upsert(&mut self, info: &proto::NodeInfo) -> RadioNode {
        let node = self
            .nodes
            .entry(info.num)
            .or_insert_with(|| RadioNode::new(info.num));
        if let Some(user) = &info.user {
            node.merge_user(user);
        }
        if let Some(pos) = &info.position {
            node.merge_position(pos);
        }
        if let Some(dm) = &info.device_metrics {
            node.merge_metrics(dm);
        }
        if info.last_heard != 0 {
            node.last_heard_epoch_s = info.last_heard;
        }
        if info.snr != 0.0 {
            node.snr = info.snr;
        }
        node.clone()
    }

    /// Merge a live position report for `node_num` (portnum 3 traffic).
    pub fn update_position(
        &mut self,
        node_num: u32,
        pos: &proto::Position,
        rx_time: u32,
        snr: f32,
    ) -> RadioNode {
        let node = self
            .nodes
            .entry(node_num)
            .or_insert_with(|| RadioNode::new(node_num));
        node.merge_position(pos);
        if rx_time != 0 {
            node.last_heard_epoch_s = rx_time;
        }
        if snr != 0.0 {
            node.snr = snr;
        }
        node.clone()
    }

    pub fn get(&self, node_num: u32) -> Option<&RadioNode> {
        self.nodes.get(&node_num)
    }

    /// Display label for a node, hex fallback for strangers.
    pub fn label(&self, node_num: u32) -> String {
        match self.nodes.get(&node_num) {
            Some(node) => node.display_name(),
            None => format!("0x{:06X}", node_num & 0xFFFFFF),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    /// Clone out every entry, most recently heard first.
    pub fn snapshot(&self) -> Vec<RadioNode> {
        let mut all: Vec<RadioNode> = self.nodes.values().cloned().collect();
        all.sort_by(|a, b| b.last_heard_epoch_s.cmp(&a.last_heard_epoch_s));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(num: u32) -> proto::NodeInfo {
        proto::NodeInfo {
            num,
            ..Default::default()
        }
    }

    #[test]
    fn created_on_first_sight_with_hex_fallback_name() {
        let mut db = NodeDatabase::new();
        let node = db.upsert(&info(0x00A1B2C3));
        assert_eq!(node.display_name(), "0xA1B2C3");
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn merge_overwrites_only_supplied_fields() {
        let mut db = NodeDatabase::new();
        let mut first = info(5);
        first.user = Some(proto::User {
            id: "!00000005".into(),
            long_name: "Base Camp".into(),
            short_name: "BC".into(),
        });
        first.last_heard = 1000;
        first.snr = 7.5;
        db.upsert(&first);

        // Second record carries only a position; names and snr survive.
        let mut second = info(5);
        second.position = Some(proto::Position {
            latitude_i: Some(520000000),
            longitude_i: Some(43000000),
            altitude: Some(12),
            time: Some(2000),
        });
        let node = db.upsert(&second);
        assert_eq!(node.long_name, "Base Camp");
        assert_eq!(node.snr, 7.5);
        assert_eq!(node.last_heard_epoch_s, 1000);
        let pos = node.position.expect("position merged");
        assert!((pos.latitude_deg() - 52.0).abs() < 1e-6);
        assert_eq!(pos.altitude, Some(12));
    }

    #[test]
    fn display_name_prefers_long_then_short_then_id() {
        let mut db = NodeDatabase::new();
        let mut rec = info(9);
        rec.user = Some(proto::User {
            id: "!09".into(),
            long_name: "  ".into(),
            short_name: "N9".into(),
        });
        let node = db.upsert(&rec);
        assert_eq!(node.display_name(), "N9");
    }

    #[test]
    fn live_position_updates_last_heard() {
        let mut db = NodeDatabase::new();
        let pos = proto::Position {
            latitude_i: Some(1),
            longitude_i: Some(2),
            altitude: None,
            time: None,
        };
        let node = db.update_position(77, &pos, 1234, -3.25);
        assert_eq!(node.last_heard_epoch_s, 1234);
        assert_eq!(node.snr, -3.25);
        assert!(node.position.is_some());
    }

    #[test]
    fn snapshot_sorts_by_recency() {
        let mut db = NodeDatabase::new();
        let mut a = info(1);
        a.last_heard = 10;
        let mut b = info(2);
        b.last_heard = 99;
        db.upsert(&a);
        db.upsert(&b);
        let snap = db.snapshot();
        assert_eq!(snap[0].node_num, 2);
        db.clear();
        assert!(db.is_empty());
    }
}
