//! Conversions from generated protobuf messages into event payloads.

use crate::protobuf::meshtastic_generated as proto;

use super::node_id::NodeId;
use super::payload::{
    MapReportPayload, ModelCode, Neighbor, NeighborInfo, NodeInfoPayload, NodeRef, Position,
    RoutingPayload, Telemetry, TraceroutePayload,
};

fn non_zero(v: u32) -> Option<u32> {
    (v != 0).then_some(v)
}

fn non_empty(s: String) -> Option<String> {
    (!s.is_empty()).then_some(s)
}

impl From<proto::User> for NodeInfoPayload {
    fn from(user: proto::User) -> Self {
        NodeInfoPayload {
            id: non_empty(user.id).map(NodeRef::Text),
            shortname: non_empty(user.short_name),
            longname: non_empty(user.long_name),
            hardware: Some(ModelCode::Code(i64::from(user.hw_model))),
            role: Some(ModelCode::Code(i64::from(user.role))),
        }
    }
}

impl From<proto::Position> for Position {
    fn from(p: proto::Position) -> Self {
        Position {
            latitude_i: p.latitude_i,
            longitude_i: p.longitude_i,
            altitude: p.altitude,
            time: non_zero(p.time),
            precision_bits: non_zero(p.precision_bits),
            sats_in_view: non_zero(p.sats_in_view),
            ground_speed: p.ground_speed,
            ground_track: p.ground_track,
            geocoded: None,
            last_geocoding: None,
        }
    }
}

impl From<proto::Telemetry> for Telemetry {
    fn from(t: proto::Telemetry) -> Self {
        use proto::telemetry::Variant;

        let mut out = Telemetry {
            time: non_zero(t.time),
            ..Default::default()
        };
        match t.variant {
            Some(Variant::DeviceMetrics(m)) => {
                out.battery_level = m.battery_level;
                out.voltage = m.voltage.map(f64::from);
                out.channel_utilization = m.channel_utilization.map(f64::from);
                out.air_util_tx = m.air_util_tx.map(f64::from);
                out.uptime_seconds = m.uptime_seconds;
            }
            Some(Variant::EnvironmentMetrics(m)) => {
                out.temperature = m.temperature.map(f64::from);
                out.relative_humidity = m.relative_humidity.map(f64::from);
                out.barometric_pressure = m.barometric_pressure.map(f64::from);
                out.gas_resistance = m.gas_resistance.map(f64::from);
                out.voltage = m.voltage.map(f64::from);
                out.current = m.current.map(f64::from);
                out.iaq = m.iaq;
                out.lux = m.lux.map(f64::from);
            }
            Some(Variant::PowerMetrics(m)) => {
                out.ch1_voltage = m.ch1_voltage.map(f64::from);
                out.ch1_current = m.ch1_current.map(f64::from);
                out.ch2_voltage = m.ch2_voltage.map(f64::from);
                out.ch2_current = m.ch2_current.map(f64::from);
                out.ch3_voltage = m.ch3_voltage.map(f64::from);
                out.ch3_current = m.ch3_current.map(f64::from);
            }
            Some(Variant::LocalStats(m)) => {
                out.uptime_seconds = Some(m.uptime_seconds);
                out.channel_utilization = Some(f64::from(m.channel_utilization));
                out.air_util_tx = Some(f64::from(m.air_util_tx));
                out.num_packets_tx = Some(m.num_packets_tx);
                out.num_packets_rx = Some(m.num_packets_rx);
                out.num_online_nodes = Some(m.num_online_nodes);
                out.num_total_nodes = Some(m.num_total_nodes);
            }
            None => {}
        }
        out
    }
}

impl From<proto::NeighborInfo> for NeighborInfo {
    fn from(n: proto::NeighborInfo) -> Self {
        NeighborInfo {
            node_id: (n.node_id != 0).then(|| NodeId::new(n.node_id)),
            node_broadcast_interval_secs: non_zero(n.node_broadcast_interval_secs),
            neighbors: n
                .neighbors
                .into_iter()
                .map(|nb| Neighbor {
                    node_id: NodeId::new(nb.node_id),
                    snr: nb.snr,
                })
                .collect(),
        }
    }
}

fn route_refs(route: Vec<u32>) -> Vec<NodeRef> {
    route.into_iter().map(|n| NodeRef::Number(u64::from(n))).collect()
}

impl From<proto::RouteDiscovery> for TraceroutePayload {
    fn from(r: proto::RouteDiscovery) -> Self {
        TraceroutePayload {
            route: route_refs(r.route),
            route_back: route_refs(r.route_back),
            snr_towards: r.snr_towards,
            snr_back: r.snr_back,
        }
    }
}

impl From<proto::Routing> for RoutingPayload {
    fn from(r: proto::Routing) -> Self {
        use proto::routing::Variant;

        match r.variant {
            Some(Variant::ErrorReason(code)) => RoutingPayload {
                error_reason: Some(code),
                route: Vec::new(),
            },
            Some(Variant::RouteRequest(d)) | Some(Variant::RouteReply(d)) => RoutingPayload {
                error_reason: None,
                route: route_refs(d.route),
            },
            None => RoutingPayload::default(),
        }
    }
}

impl From<proto::MapReport> for MapReportPayload {
    fn from(m: proto::MapReport) -> Self {
        MapReportPayload {
            long_name: m.long_name,
            short_name: m.short_name,
            role: Some(ModelCode::Code(i64::from(m.role))),
            hw_model: Some(ModelCode::Code(i64::from(m.hw_model))),
            firmware_version: m.firmware_version,
            region: Some(m.region),
            modem_preset: Some(m.modem_preset),
            latitude_i: Some(m.latitude_i),
            longitude_i: Some(m.longitude_i),
            altitude: Some(m.altitude),
            position_precision: non_zero(m.position_precision),
            num_online_local_nodes: Some(m.num_online_local_nodes),
        }
    }
}
