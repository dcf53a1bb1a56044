use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};

use ovs::{Dpid, MacAddress, PortNo};
use stores::{NetworkId, StoreError, TunnelKey};

use crate::bridge::{RestCommand, RestHandle, RestOutcome};

/// Builds the `/v1.0` router over a bridge handle. The handle is the only
/// thing handlers hold — see [`crate::bridge`] for why.
pub fn router(handle: RestHandle) -> Router {
    Router::new()
        .route("/v1.0/networks", get(list_networks))
        .route("/v1.0/networks/:net", post(create_network).put(update_network).delete(remove_network))
        .route("/v1.0/networks/:net/", get(list_ports))
        .route(
            "/v1.0/networks/:net/:dpid_port",
            post(create_port).put(update_port).delete(remove_port),
        )
        .route("/v1.0/networks/:net/:dpid_port/macs/", get(list_macs))
        .route("/v1.0/networks/:net/:dpid_port/macs/:mac", post(create_mac).put(update_mac))
        .route("/v1.0/networks/:net/tunnel_key", get(get_tunnel_key).post(create_tunnel_key).put(update_tunnel_key).delete(delete_tunnel_key))
        .route("/v1.0/switches/:dpid/tunnel_ports", get(list_tunnel_ports))
        .route(
            "/v1.0/switches/:dpid/tunnel_ports/:remote_dpid_port",
            post(create_tunnel_port).put(update_tunnel_port),
        )
        .with_state(handle)
}

fn status_for(error: StoreError) -> StatusCode {
    match error {
        StoreError::NotFound => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists => StatusCode::CONFLICT,
        StoreError::Conflict => StatusCode::CONFLICT,
        StoreError::Reserved => StatusCode::CONFLICT,
    }
}

fn outcome_response(result: Result<RestOutcome, StoreError>) -> Response {
    match result {
        Ok(RestOutcome::Empty) => StatusCode::OK.into_response(),
        Ok(RestOutcome::Strings(values)) => (StatusCode::OK, Json(values)).into_response(),
        Ok(RestOutcome::TunnelKey(key)) => (StatusCode::OK, Json(key)).into_response(),
        Err(error) => status_for(error).into_response(),
    }
}

/// Splits a `{dpid}_{port}` path segment, 404-ing (rather than 400-ing) on a
/// malformed segment since there is no route to have matched it against.
fn parse_dpid_port(segment: &str) -> Result<(Dpid, PortNo), StatusCode> {
    let (dpid, port) = segment.split_once('_').ok_or(StatusCode::NOT_FOUND)?;
    let dpid: Dpid = dpid.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    let port: PortNo = port.parse().map_err(|_| StatusCode::NOT_FOUND)?;
    Ok((dpid, port))
}

async fn list_networks(State(handle): State<RestHandle>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::ListNetworks { reply }).await)
}

async fn create_network(State(handle): State<RestHandle>, Path(net): Path<String>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::CreateNetwork { net: NetworkId::from(net), reply }).await)
}

async fn update_network(State(handle): State<RestHandle>, Path(net): Path<String>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::UpdateNetwork { net: NetworkId::from(net), reply }).await)
}

async fn remove_network(State(handle): State<RestHandle>, Path(net): Path<String>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::RemoveNetwork { net: NetworkId::from(net), reply }).await)
}

async fn list_ports(State(handle): State<RestHandle>, Path(net): Path<String>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::ListPorts { net: NetworkId::from(net), reply }).await)
}

async fn create_port(State(handle): State<RestHandle>, Path((net, dpid_port)): Path<(String, String)>) -> Response {
    let (dpid, port) = match parse_dpid_port(&dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::CreatePort { net: NetworkId::from(net), dpid, port, reply }).await)
}

async fn update_port(State(handle): State<RestHandle>, Path((net, dpid_port)): Path<(String, String)>) -> Response {
    let (dpid, port) = match parse_dpid_port(&dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::UpdatePort { net: NetworkId::from(net), dpid, port, reply }).await)
}

async fn remove_port(State(handle): State<RestHandle>, Path((net, dpid_port)): Path<(String, String)>) -> Response {
    let (dpid, port) = match parse_dpid_port(&dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::RemovePort { net: NetworkId::from(net), dpid, port, reply }).await)
}

async fn list_macs(State(handle): State<RestHandle>, Path((net, dpid_port)): Path<(String, String)>) -> Response {
    let (dpid, port) = match parse_dpid_port(&dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::ListMacs { net: NetworkId::from(net), dpid, port, reply }).await)
}

async fn create_mac(
    State(handle): State<RestHandle>,
    Path((net, dpid_port, mac)): Path<(String, String, String)>,
) -> Response {
    let (dpid, port) = match parse_dpid_port(&dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    let mac: MacAddress = match mac.parse() {
        Ok(mac) => mac,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::CreateMac { net: NetworkId::from(net), dpid, port, mac, reply }).await)
}

async fn update_mac(
    State(handle): State<RestHandle>,
    Path((net, dpid_port, mac)): Path<(String, String, String)>,
) -> Response {
    let (dpid, port) = match parse_dpid_port(&dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    let mac: MacAddress = match mac.parse() {
        Ok(mac) => mac,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::UpdateMac { net: NetworkId::from(net), dpid, port, mac, reply }).await)
}

async fn get_tunnel_key(State(handle): State<RestHandle>, Path(net): Path<String>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::GetTunnelKey { net: NetworkId::from(net), reply }).await)
}

#[derive(serde::Deserialize)]
struct TunnelKeyBody {
    key: u32,
}

async fn create_tunnel_key(
    State(handle): State<RestHandle>,
    Path(net): Path<String>,
    Json(body): Json<TunnelKeyBody>,
) -> Response {
    outcome_response(
        handle.call(|reply| RestCommand::CreateTunnelKey { net: NetworkId::from(net), key: TunnelKey(body.key), reply }).await,
    )
}

async fn update_tunnel_key(
    State(handle): State<RestHandle>,
    Path(net): Path<String>,
    Json(body): Json<TunnelKeyBody>,
) -> Response {
    outcome_response(
        handle.call(|reply| RestCommand::UpdateTunnelKey { net: NetworkId::from(net), key: TunnelKey(body.key), reply }).await,
    )
}

async fn delete_tunnel_key(State(handle): State<RestHandle>, Path(net): Path<String>) -> Response {
    outcome_response(handle.call(|reply| RestCommand::DeleteTunnelKey { net: NetworkId::from(net), reply }).await)
}

async fn list_tunnel_ports(State(handle): State<RestHandle>, Path(dpid): Path<String>) -> Response {
    let dpid: Dpid = match dpid.parse() {
        Ok(dpid) => dpid,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::ListTunnelPorts { dpid, reply }).await)
}

async fn create_tunnel_port(
    State(handle): State<RestHandle>,
    Path((dpid, remote_dpid_port)): Path<(String, String)>,
) -> Response {
    let dpid: Dpid = match dpid.parse() {
        Ok(dpid) => dpid,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let (remote_dpid, port) = match parse_dpid_port(&remote_dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::CreateTunnelPort { dpid, remote_dpid, port, reply }).await)
}

async fn update_tunnel_port(
    State(handle): State<RestHandle>,
    Path((dpid, remote_dpid_port)): Path<(String, String)>,
) -> Response {
    let dpid: Dpid = match dpid.parse() {
        Ok(dpid) => dpid,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    let (remote_dpid, port) = match parse_dpid_port(&remote_dpid_port) {
        Ok(v) => v,
        Err(status) => return status.into_response(),
    };
    outcome_response(handle.call(|reply| RestCommand::UpdateTunnelPort { dpid, remote_dpid, port, reply }).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use bus::Bus;
    use stores::{NetworkStore, TunnelsStore};
    use tower::ServiceExt;

    use crate::bridge::RestBridge;

    fn mac(s: &str) -> String {
        s.to_string()
    }

    async fn wire() -> Router {
        let bus = Bus::new();
        let networks = Rc::new(RefCell::new(NetworkStore::new()));
        let tunnels = Rc::new(RefCell::new(TunnelsStore::new()));
        let (bridge, handle) = RestBridge::new(networks, tunnels, bus);
        tokio::task::spawn_local(bridge.run());
        router(handle)
    }

    #[tokio::test]
    async fn create_network_then_list_round_trips() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let app = wire().await;

                let response = app
                    .clone()
                    .oneshot(axum::http::Request::builder().method("POST").uri("/v1.0/networks/netA").body(axum::body::Body::empty()).unwrap())
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::OK);

                let response = app
                    .clone()
                    .oneshot(axum::http::Request::builder().method("POST").uri("/v1.0/networks/netA").body(axum::body::Body::empty()).unwrap())
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::CONFLICT);

                let response =
                    app.oneshot(axum::http::Request::builder().method("GET").uri("/v1.0/networks").body(axum::body::Body::empty()).unwrap()).await.unwrap();
                assert_eq!(response.status(), StatusCode::OK);
                let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
                let names: Vec<String> = serde_json::from_slice(&body).unwrap();
                assert_eq!(names, vec!["netA".to_string()]);
            })
            .await;
    }

    #[tokio::test]
    async fn bind_port_then_register_mac_then_unbind_clears_it() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let app = wire().await;

                let req = |method: &str, uri: String| axum::http::Request::builder().method(method).uri(uri).body(axum::body::Body::empty()).unwrap();

                assert_eq!(app.clone().oneshot(req("POST", "/v1.0/networks/netA".into())).await.unwrap().status(), StatusCode::OK);
                assert_eq!(
                    app.clone().oneshot(req("POST", "/v1.0/networks/netA/0000000000000001_2".into())).await.unwrap().status(),
                    StatusCode::OK
                );
                assert_eq!(
                    app.clone()
                        .oneshot(req("POST", format!("/v1.0/networks/netA/0000000000000001_2/macs/{}", mac("02:00:00:00:00:01"))))
                        .await
                        .unwrap()
                        .status(),
                    StatusCode::OK
                );

                let response = app.clone().oneshot(req("GET", "/v1.0/networks/netA/0000000000000001_2/macs/".into())).await.unwrap();
                let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
                let macs: Vec<String> = serde_json::from_slice(&body).unwrap();
                assert_eq!(macs, vec!["02:00:00:00:00:01".to_string()]);

                assert_eq!(
                    app.clone().oneshot(req("DELETE", "/v1.0/networks/netA/0000000000000001_2".into())).await.unwrap().status(),
                    StatusCode::OK
                );

                let response = app.oneshot(req("GET", "/v1.0/networks/netA/".into())).await.unwrap();
                let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
                let ports: Vec<String> = serde_json::from_slice(&body).unwrap();
                assert!(ports.is_empty());
            })
            .await;
    }

    #[tokio::test]
    async fn tunnel_port_bind_under_reserved_network_needs_no_create_network() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let app = wire().await;
                let req = |method: &str, uri: String| axum::http::Request::builder().method(method).uri(uri).body(axum::body::Body::empty()).unwrap();

                assert_eq!(
                    app.clone()
                        .oneshot(req("POST", "/v1.0/networks/__NW_ID_VPORT_GRE/0000000000000001_2".into()))
                        .await
                        .unwrap()
                        .status(),
                    StatusCode::OK
                );
                assert_eq!(
                    app.oneshot(req("POST", "/v1.0/switches/0000000000000001/tunnel_ports/0000000000000002_2".into())).await.unwrap().status(),
                    StatusCode::OK
                );
            })
            .await;
    }
}
