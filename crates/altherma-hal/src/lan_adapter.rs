//! Device backend for the heat pump's LAN adapter.
//!
//! The adapter speaks JSON over a WebSocket at `ws://<host>/mca`.  Every
//! request is an `m2m:rqp` frame carrying a request id (`rqi`); the adapter
//! answers with an `m2m:rsp` frame echoing that id, a status code (`rsc`) and,
//! for reads, the value under `pc.m2m:cin.con`.
//!
//! ```text
//! read   {"m2m:rqp":{"op":2,"to":"/[0]/MNAE/1/Sensor/IndoorTemperature/la",...}}
//! write  {"m2m:rqp":{"op":1,"to":"/[0]/MNAE/1/Operation/Power","ty":4,
//!                    "pc":{"m2m:cin":{"con":"on","cnf":"text/plain:0"}},...}}
//! ```
//!
//! A session is built in two steps: [`LanAdapterConnection::open`] connects
//! the socket, then [`LanAdapterConnection::discover`] walks the unit
//! profiles and returns a [`LanAdapterSession`].  Only the latter implements
//! [`DeviceSession`], so nothing can be sent to an undiscovered device.
//!
//! Requests are pipelined: writers share the sending half of the socket while
//! a reader task routes each response to its caller by `rqi`.  The timeout
//! bounds the wait for a response and starts once the request is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use altherma_types::{BridgeError, ClimateControlMode, ControlConfiguration};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::device::{ClimateControl, DeviceConnector, DeviceSession, HotWaterTank};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const ORIGINATOR: &str = "/OpenDaikinMqtt";
const RESOURCE_ROOT: &str = "/[0]/MNAE/";
/// Discovery gives up after this many unit profiles.
const MAX_UNITS: usize = 16;

// ────────────────────────────────────────────────────────────────────────────
// Wire format
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Error)]
enum RequestError {
    #[error("adapter answered with status {0}")]
    Status(u64),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Transport(String),
}

impl RequestError {
    fn into_bridge(self, dest: String) -> BridgeError {
        BridgeError::DeviceRequest {
            dest,
            details: self.to_string(),
        }
    }
}

/// Build a request frame.  `content` turns the request into a write.
fn build_request(rqi: &str, dest: &str, content: Option<&Value>) -> Value {
    let to = format!("{RESOURCE_ROOT}{dest}");
    match content {
        None => json!({
            "m2m:rqp": { "fr": ORIGINATOR, "rqi": rqi, "op": 2, "to": to }
        }),
        Some(con) => json!({
            "m2m:rqp": {
                "fr": ORIGINATOR,
                "rqi": rqi,
                "op": 1,
                "to": to,
                "ty": 4,
                "pc": { "m2m:cin": { "con": con, "cnf": "text/plain:0" } }
            }
        }),
    }
}

/// Parse a response frame into its request id and outcome.  Frames that are
/// not `m2m:rsp` responses yield `None`.
fn parse_response(text: &str) -> Option<(String, Result<Option<Value>, RequestError>)> {
    let frame: Value = serde_json::from_str(text).ok()?;
    let rsp = frame.get("m2m:rsp")?;
    let rqi = rsp.get("rqi")?.as_str()?.to_string();
    let rsc = rsp.get("rsc").and_then(Value::as_u64).unwrap_or(0);
    let outcome = if (2000..2100).contains(&rsc) {
        Ok(rsp.pointer("/pc/m2m:cin/con").cloned())
    } else {
        Err(RequestError::Status(rsc))
    };
    Some((rqi, outcome))
}

// ────────────────────────────────────────────────────────────────────────────
// Transport
// ────────────────────────────────────────────────────────────────────────────

type Outcome = Result<Option<Value>, RequestError>;

type WaiterMap = HashMap<String, oneshot::Sender<Outcome>>;

/// In-flight requests by `rqi`.  `None` once the socket has gone away.
type Waiters = Arc<StdMutex<Option<WaiterMap>>>;

fn waiters(waiters: &Waiters) -> MutexGuard<'_, Option<WaiterMap>> {
    waiters.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Transport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    waiters: Waiters,
    reader: JoinHandle<()>,
    timeout: Duration,
    closed: AtomicBool,
}

impl Transport {
    fn new(stream: WsStream, timeout: Duration) -> Self {
        let (sink, stream) = stream.split();
        let waiters: Waiters = Arc::new(StdMutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(route_responses(stream, waiters.clone()));
        Self {
            sink: Mutex::new(sink),
            waiters,
            reader,
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    async fn request(&self, dest: &str, content: Option<Value>) -> Outcome {
        if self.closed.load(Ordering::Acquire) {
            return Err(RequestError::Transport("session closed".to_string()));
        }
        let rqi = Uuid::new_v4().simple().to_string();
        let frame = build_request(&rqi, dest, content.as_ref()).to_string();
        trace!(rqi = %rqi, dest, "lan adapter request");

        let (tx, rx) = oneshot::channel();
        match waiters(&self.waiters).as_mut() {
            Some(pending) => {
                pending.insert(rqi.clone(), tx);
            }
            None => {
                return Err(RequestError::Transport(
                    "connection closed by adapter".to_string(),
                ));
            }
        }

        let send = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Text(frame.into())).await
        };
        let sent = match tokio::time::timeout(self.timeout, send).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RequestError::Transport(e.to_string())),
            Err(_) => Err(RequestError::Timeout(self.timeout)),
        };
        if let Err(e) = sent {
            self.forget(&rqi);
            return Err(e);
        }

        // The response clock starts once the frame is on the wire.
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RequestError::Transport(
                "connection closed by adapter".to_string(),
            )),
            Err(_) => {
                self.forget(&rqi);
                Err(RequestError::Timeout(self.timeout))
            }
        }
    }

    fn forget(&self, rqi: &str) {
        if let Some(pending) = waiters(&self.waiters).as_mut() {
            pending.remove(rqi);
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "closing lan adapter socket");
        }
        self.reader.abort();
        waiters(&self.waiters).take();
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Hand each response to the request waiting on its `rqi`.  When the socket
/// ends every outstanding request fails with the close reason.
async fn route_responses(mut stream: SplitStream<WsStream>, pending: Waiters) {
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match parse_response(text.as_str()) {
                Some((rqi, outcome)) => {
                    let waiter = waiters(&pending).as_mut().and_then(|p| p.remove(&rqi));
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(outcome);
                        }
                        None => trace!(rqi = %rqi, "discarding stale response"),
                    }
                }
                None => debug!("ignoring unrecognised frame from adapter"),
            },
            Some(Ok(Message::Close(_))) | None => {
                break "connection closed by adapter".to_string();
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => break e.to_string(),
        }
    };

    debug!(reason = %reason, "lan adapter reader stopped");
    if let Some(pending) = waiters(&pending).take() {
        for (_, tx) in pending {
            let _ = tx.send(Err(RequestError::Transport(reason.clone())));
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Units
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct UnitHandle {
    transport: Arc<Transport>,
    index: usize,
}

impl UnitHandle {
    async fn read(&self, path: &str) -> Result<Value, BridgeError> {
        let dest = format!("{}/{path}/la", self.index);
        match self.transport.request(&dest, None).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(BridgeError::DeviceRequest {
                dest,
                details: "response carried no value".to_string(),
            }),
            Err(e) => Err(e.into_bridge(dest)),
        }
    }

    async fn write(&self, path: &str, value: Value) -> Result<(), BridgeError> {
        let dest = format!("{}/{path}", self.index);
        debug!(dest = %dest, value = %value, "lan adapter write");
        match self.transport.request(&dest, Some(value)).await {
            Ok(_) => Ok(()),
            Err(e) => Err(e.into_bridge(dest)),
        }
    }

    async fn read_f64(&self, path: &str) -> Result<f64, BridgeError> {
        let value = self.read(path).await?;
        let number = match &value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        number.ok_or_else(|| self.unexpected(path, &value))
    }

    async fn read_string(&self, path: &str) -> Result<String, BridgeError> {
        match self.read(path).await? {
            Value::String(s) => Ok(s),
            other => Err(self.unexpected(path, &other)),
        }
    }

    async fn read_power(&self) -> Result<bool, BridgeError> {
        Ok(self.read_string("Operation/Power").await? == "on")
    }

    async fn write_power(&self, on: bool) -> Result<(), BridgeError> {
        let state = if on { "on" } else { "standby" };
        self.write("Operation/Power", json!(state)).await
    }

    fn unexpected(&self, path: &str, value: &Value) -> BridgeError {
        BridgeError::DeviceRequest {
            dest: format!("{}/{path}", self.index),
            details: format!("unexpected value {value}"),
        }
    }
}

fn mode_path(mode: ClimateControlMode) -> &'static str {
    match mode {
        ClimateControlMode::Heating => "Heating",
        ClimateControlMode::Cooling => "Cooling",
        ClimateControlMode::Auto => "Auto",
    }
}

/// The hot water tank unit of a discovered adapter.
pub struct LanHotWaterTank {
    unit: UnitHandle,
}

#[async_trait]
impl HotWaterTank for LanHotWaterTank {
    async fn is_turned_on(&self) -> Result<bool, BridgeError> {
        self.unit.read_power().await
    }

    async fn turn_on(&self) -> Result<(), BridgeError> {
        self.unit.write_power(true).await
    }

    async fn turn_off(&self) -> Result<(), BridgeError> {
        self.unit.write_power(false).await
    }

    async fn tank_temperature(&self) -> Result<f64, BridgeError> {
        self.unit.read_f64("Sensor/TankTemperature").await
    }

    async fn target_temperature(&self) -> Result<f64, BridgeError> {
        self.unit.read_f64("Operation/TargetTemperature").await
    }

    async fn set_target_temperature(&self, value: f64) -> Result<(), BridgeError> {
        self.unit
            .write("Operation/TargetTemperature", json!(value))
            .await
    }

    async fn domestic_hot_water_temperature_heating(&self) -> Result<f64, BridgeError> {
        self.unit
            .read_f64("Operation/DomesticHotWaterTemperatureHeating")
            .await
    }

    async fn set_domestic_hot_water_temperature_heating(
        &self,
        value: i64,
    ) -> Result<(), BridgeError> {
        self.unit
            .write("Operation/DomesticHotWaterTemperatureHeating", json!(value))
            .await
    }

    async fn powerful(&self) -> Result<bool, BridgeError> {
        Ok(self.unit.read_f64("Operation/Powerful").await? != 0.0)
    }

    async fn set_powerful(&self, on: bool) -> Result<(), BridgeError> {
        self.unit
            .write("Operation/Powerful", json!(u8::from(on)))
            .await
    }
}

/// The space heating / cooling unit of a discovered adapter.
pub struct LanClimateControl {
    unit: UnitHandle,
    heating: ControlConfiguration,
    cooling: ControlConfiguration,
}

#[async_trait]
impl ClimateControl for LanClimateControl {
    async fn is_turned_on(&self) -> Result<bool, BridgeError> {
        self.unit.read_power().await
    }

    async fn turn_on(&self) -> Result<(), BridgeError> {
        self.unit.write_power(true).await
    }

    async fn turn_off(&self) -> Result<(), BridgeError> {
        self.unit.write_power(false).await
    }

    async fn indoor_temperature(&self) -> Result<f64, BridgeError> {
        self.unit.read_f64("Sensor/IndoorTemperature").await
    }

    async fn outdoor_temperature(&self) -> Result<f64, BridgeError> {
        self.unit.read_f64("Sensor/OutdoorTemperature").await
    }

    fn heating_configuration(&self) -> ControlConfiguration {
        self.heating
    }

    fn cooling_configuration(&self) -> ControlConfiguration {
        self.cooling
    }

    async fn operation_mode(&self) -> Result<ClimateControlMode, BridgeError> {
        let raw = self.unit.read_string("Operation/OperationMode").await?;
        raw.parse().map_err(|_| BridgeError::DeviceRequest {
            dest: format!("{}/Operation/OperationMode", self.unit.index),
            details: format!("unknown operation mode {raw:?}"),
        })
    }

    async fn set_operation_mode(&self, mode: ClimateControlMode) -> Result<(), BridgeError> {
        self.unit
            .write("Operation/OperationMode", json!(mode.as_str()))
            .await
    }

    async fn leaving_water_temperature_current(&self) -> Result<f64, BridgeError> {
        self.unit
            .read_f64("Sensor/LeavingWaterTemperatureCurrent")
            .await
    }

    async fn leaving_water_temperature_offset(
        &self,
        mode: ClimateControlMode,
    ) -> Result<f64, BridgeError> {
        let path = format!("Operation/LeavingWaterTemperatureOffset{}", mode_path(mode));
        self.unit.read_f64(&path).await
    }

    async fn set_leaving_water_temperature_offset(
        &self,
        mode: ClimateControlMode,
        value: i64,
    ) -> Result<(), BridgeError> {
        let path = format!("Operation/LeavingWaterTemperatureOffset{}", mode_path(mode));
        self.unit.write(&path, json!(value)).await
    }

    async fn leaving_water_temperature(
        &self,
        mode: ClimateControlMode,
    ) -> Result<f64, BridgeError> {
        let path = format!("Operation/LeavingWaterTemperature{}", mode_path(mode));
        self.unit.read_f64(&path).await
    }

    async fn set_leaving_water_temperature(
        &self,
        mode: ClimateControlMode,
        value: i64,
    ) -> Result<(), BridgeError> {
        let path = format!("Operation/LeavingWaterTemperature{}", mode_path(mode));
        self.unit.write(&path, json!(value)).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Discovery
// ────────────────────────────────────────────────────────────────────────────

/// Unit profiles arrive as a JSON document encoded in a string.
fn parse_profile(con: Value) -> Value {
    match con {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::Null),
        other => other,
    }
}

fn has_sensor(profile: &Value, name: &str) -> bool {
    profile
        .get("Sensor")
        .and_then(Value::as_array)
        .is_some_and(|sensors| sensors.iter().any(|s| s.as_str() == Some(name)))
}

fn has_operation(profile: &Value, name: &str) -> bool {
    profile
        .get("Operation")
        .and_then(Value::as_object)
        .is_some_and(|ops| ops.contains_key(name))
}

fn configuration_for(profile: &Value, mode: ClimateControlMode) -> ControlConfiguration {
    let offset = format!("LeavingWaterTemperatureOffset{}", mode_path(mode));
    if has_operation(profile, &offset) {
        ControlConfiguration::WeatherDependent
    } else {
        ControlConfiguration::Fixed
    }
}

/// An open but undiscovered adapter connection.
pub struct LanAdapterConnection {
    transport: Arc<Transport>,
}

impl LanAdapterConnection {
    /// Connect to `ws://<host>/mca`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DiscoveryFailed`] when the socket cannot be opened
    /// within `timeout`.
    pub async fn open(host: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let url = format!("ws://{host}/mca");
        let (stream, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| BridgeError::DiscoveryFailed(format!("connecting to {url} timed out")))?
            .map_err(|e| BridgeError::DiscoveryFailed(format!("connecting to {url}: {e}")))?;
        info!(url = %url, "connected to LAN adapter");

        Ok(Self {
            transport: Arc::new(Transport::new(stream, timeout)),
        })
    }

    /// Read unit profiles `0, 1, ...` until the adapter reports a
    /// non-success status, and pick out the tank and climate-control units.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DiscoveryFailed`] on a transport failure or when either
    /// unit is missing.  The socket is closed in that case.
    pub async fn discover(self) -> Result<LanAdapterSession, BridgeError> {
        match self.find_units().await {
            Ok((tank, climate)) => {
                info!(
                    tank_unit = tank.unit.index,
                    climate_unit = climate.unit.index,
                    heating = %climate.heating,
                    cooling = %climate.cooling,
                    "LAN adapter discovery complete"
                );
                Ok(LanAdapterSession {
                    transport: self.transport,
                    tank,
                    climate,
                })
            }
            Err(e) => {
                self.transport.close().await;
                Err(e)
            }
        }
    }

    async fn find_units(&self) -> Result<(LanHotWaterTank, LanClimateControl), BridgeError> {
        let mut tank = None;
        let mut climate = None;

        for index in 0..MAX_UNITS {
            let dest = format!("{index}/UnitProfile/la");
            let profile = match self.transport.request(&dest, None).await {
                Ok(Some(con)) => parse_profile(con),
                Ok(None) => Value::Null,
                Err(RequestError::Status(rsc)) => {
                    debug!(index, rsc, "end of unit profiles");
                    break;
                }
                Err(e) => return Err(BridgeError::DiscoveryFailed(format!("reading {dest}: {e}"))),
            };

            let unit = UnitHandle {
                transport: self.transport.clone(),
                index,
            };
            if tank.is_none() && has_sensor(&profile, "TankTemperature") {
                tank = Some(LanHotWaterTank { unit });
            } else if climate.is_none() && has_operation(&profile, "OperationMode") {
                climate = Some(LanClimateControl {
                    unit,
                    heating: configuration_for(&profile, ClimateControlMode::Heating),
                    cooling: configuration_for(&profile, ClimateControlMode::Cooling),
                });
            } else {
                trace!(index, "skipping unit");
            }
        }

        match (tank, climate) {
            (Some(tank), Some(climate)) => Ok((tank, climate)),
            (None, _) => Err(BridgeError::DiscoveryFailed(
                "no hot water tank unit found".to_string(),
            )),
            (_, None) => Err(BridgeError::DiscoveryFailed(
                "no climate control unit found".to_string(),
            )),
        }
    }
}

/// A discovered adapter exposing both sub-units.
pub struct LanAdapterSession {
    transport: Arc<Transport>,
    tank: LanHotWaterTank,
    climate: LanClimateControl,
}

#[async_trait]
impl DeviceSession for LanAdapterSession {
    fn hot_water_tank(&self) -> &dyn HotWaterTank {
        &self.tank
    }

    fn climate_control(&self) -> &dyn ClimateControl {
        &self.climate
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.transport.close().await;
        info!("LAN adapter session closed");
        Ok(())
    }
}

/// Opens and discovers a [`LanAdapterSession`].
#[derive(Debug, Clone)]
pub struct LanAdapterConnector {
    host: String,
    timeout: Duration,
}

impl LanAdapterConnector {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DeviceConnector for LanAdapterConnector {
    async fn connect(&self) -> Result<Arc<dyn DeviceSession>, BridgeError> {
        let session = LanAdapterConnection::open(&self.host, self.timeout)
            .await?
            .discover()
            .await?;
        Ok(Arc::new(session))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    type Writes = Arc<StdMutex<Vec<(String, Value)>>>;

    /// A scripted adapter: reads answer from `values`, writes are recorded
    /// and stored, paths in `silent` never get an answer.  Every answer is
    /// delayed by `latency` independently of the others.  Reading
    /// `hang_up_on` drops the connection.
    #[derive(Default)]
    struct FakeAdapter {
        values: HashMap<String, Value>,
        silent: HashSet<String>,
        latency: Duration,
        hang_up_on: Option<String>,
    }

    impl FakeAdapter {
        fn standard() -> Self {
            let gateway = json!({ "Sensor": [], "Operation": {} });
            let climate = json!({
                "Sensor": ["IndoorTemperature", "OutdoorTemperature", "LeavingWaterTemperatureCurrent"],
                "Operation": {
                    "Power": ["on", "standby"],
                    "OperationMode": ["heating", "cooling", "auto"],
                    "LeavingWaterTemperatureOffsetHeating": { "minValue": -10, "maxValue": 10 },
                    "LeavingWaterTemperatureCooling": { "minValue": 5, "maxValue": 22 }
                }
            });
            let tank = json!({
                "Sensor": ["TankTemperature"],
                "Operation": { "Power": ["on", "standby"], "TargetTemperature": {}, "Powerful": [0, 1] }
            });

            let mut fake = Self::default();
            fake.set("0/UnitProfile", json!(gateway.to_string()));
            fake.set("1/UnitProfile", json!(climate.to_string()));
            fake.set("2/UnitProfile", json!(tank.to_string()));
            fake.set("1/Operation/Power", json!("on"));
            fake.set("1/Sensor/IndoorTemperature", json!(21.5));
            fake.set("1/Sensor/OutdoorTemperature", json!("7.0"));
            fake.set("1/Operation/OperationMode", json!("heating"));
            fake.set("2/Operation/Power", json!("standby"));
            fake.set("2/Sensor/TankTemperature", json!(46));
            fake.set("2/Operation/Powerful", json!(1));
            fake
        }

        fn set(&mut self, path: &str, value: Value) {
            self.values.insert(path.to_string(), value);
        }
    }

    async fn spawn_adapter(fake: FakeAdapter) -> (String, Writes) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let writes: Writes = Arc::default();
        let recorded = writes.clone();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut sink, mut ws) = accept_async(stream).await.unwrap().split();
            let FakeAdapter {
                mut values,
                silent,
                latency,
                hang_up_on,
            } = fake;

            let (answers, mut outbox) = tokio::sync::mpsc::unbounded_channel::<String>();
            tokio::spawn(async move {
                while let Some(text) = outbox.recv().await {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
            });

            while let Some(Ok(msg)) = ws.next().await {
                let Message::Text(text) = msg else { continue };
                let request: Value = serde_json::from_str(text.as_str()).unwrap();
                let rqp = &request["m2m:rqp"];
                let rqi = rqp["rqi"].as_str().unwrap().to_string();
                let to = rqp["to"].as_str().unwrap();
                let dest = to.trim_start_matches(RESOURCE_ROOT).to_string();

                let (rsc, con) = if rqp["op"] == 1 {
                    assert_eq!(rqp["ty"], 4);
                    assert_eq!(rqp["pc"]["m2m:cin"]["cnf"], "text/plain:0");
                    let con = rqp["pc"]["m2m:cin"]["con"].clone();
                    recorded.lock().unwrap().push((dest.clone(), con.clone()));
                    values.insert(dest, con);
                    (2001, None)
                } else {
                    let path = dest.trim_end_matches("/la");
                    if hang_up_on.as_deref() == Some(path) {
                        break;
                    }
                    if silent.contains(path) {
                        continue;
                    }
                    match values.get(path) {
                        Some(value) => (2000, Some(value.clone())),
                        None => (4004, None),
                    }
                };

                let mut rsp = json!({ "m2m:rsp": { "rsc": rsc, "rqi": rqi, "to": ORIGINATOR } });
                if let Some(con) = con {
                    rsp["m2m:rsp"]["pc"] = json!({ "m2m:cin": { "con": con } });
                }
                let answers = answers.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    let _ = answers.send(rsp.to_string());
                });
            }
        });

        (addr.to_string(), writes)
    }

    async fn discovered(fake: FakeAdapter) -> (LanAdapterSession, Writes) {
        let (host, writes) = spawn_adapter(fake).await;
        let session = LanAdapterConnection::open(&host, Duration::from_secs(2))
            .await
            .unwrap()
            .discover()
            .await
            .unwrap();
        (session, writes)
    }

    #[test]
    fn read_request_targets_latest_value() {
        let frame = build_request("abc", "1/Sensor/IndoorTemperature/la", None);
        assert_eq!(frame["m2m:rqp"]["op"], 2);
        assert_eq!(
            frame["m2m:rqp"]["to"],
            "/[0]/MNAE/1/Sensor/IndoorTemperature/la"
        );
        assert!(frame["m2m:rqp"].get("pc").is_none());
    }

    #[test]
    fn response_status_is_checked() {
        let ok = r#"{"m2m:rsp":{"rsc":2000,"rqi":"a","pc":{"m2m:cin":{"con":21.5}}}}"#;
        assert_eq!(
            parse_response(ok),
            Some(("a".to_string(), Ok(Some(json!(21.5)))))
        );

        let missing = r#"{"m2m:rsp":{"rsc":4004,"rqi":"b"}}"#;
        assert_eq!(
            parse_response(missing),
            Some(("b".to_string(), Err(RequestError::Status(4004))))
        );

        assert_eq!(parse_response(r#"{"hello":1}"#), None);
        assert_eq!(parse_response("not json"), None);
    }

    #[test]
    fn configuration_follows_offset_operations() {
        let profile = json!({ "Operation": { "LeavingWaterTemperatureOffsetHeating": {} } });
        assert_eq!(
            configuration_for(&profile, ClimateControlMode::Heating),
            ControlConfiguration::WeatherDependent
        );
        assert_eq!(
            configuration_for(&profile, ClimateControlMode::Cooling),
            ControlConfiguration::Fixed
        );
    }

    #[tokio::test]
    async fn discovery_finds_both_units() {
        let (session, _) = discovered(FakeAdapter::standard()).await;

        let climate = session.climate_control();
        assert_eq!(
            climate.heating_configuration(),
            ControlConfiguration::WeatherDependent
        );
        assert_eq!(climate.cooling_configuration(), ControlConfiguration::Fixed);
        assert_eq!(session.tank.unit.index, 2);
        assert_eq!(session.climate.unit.index, 1);
    }

    #[tokio::test]
    async fn getters_decode_adapter_values() {
        let (session, _) = discovered(FakeAdapter::standard()).await;
        let tank = session.hot_water_tank();
        let climate = session.climate_control();

        assert!(!tank.is_turned_on().await.unwrap());
        assert!(tank.powerful().await.unwrap());
        assert!((tank.tank_temperature().await.unwrap() - 46.0).abs() < f64::EPSILON);
        assert!(climate.is_turned_on().await.unwrap());
        assert!((climate.indoor_temperature().await.unwrap() - 21.5).abs() < f64::EPSILON);
        assert!((climate.outdoor_temperature().await.unwrap() - 7.0).abs() < f64::EPSILON);
        assert_eq!(
            climate.operation_mode().await.unwrap(),
            ClimateControlMode::Heating
        );
    }

    #[tokio::test]
    async fn setters_write_content_instances() {
        let (session, writes) = discovered(FakeAdapter::standard()).await;

        session
            .hot_water_tank()
            .set_target_temperature(21.6)
            .await
            .unwrap();
        session.hot_water_tank().turn_on().await.unwrap();
        session
            .climate_control()
            .set_operation_mode(ClimateControlMode::Cooling)
            .await
            .unwrap();
        session
            .climate_control()
            .set_leaving_water_temperature_offset(ClimateControlMode::Heating, -2)
            .await
            .unwrap();

        assert_eq!(
            *writes.lock().unwrap(),
            vec![
                ("2/Operation/TargetTemperature".to_string(), json!(21.6)),
                ("2/Operation/Power".to_string(), json!("on")),
                ("1/Operation/OperationMode".to_string(), json!("cooling")),
                (
                    "1/Operation/LeavingWaterTemperatureOffsetHeating".to_string(),
                    json!(-2)
                ),
            ]
        );
        assert!(session.hot_water_tank().is_turned_on().await.unwrap());
    }

    #[tokio::test]
    async fn missing_value_is_a_device_request_error() {
        let (session, _) = discovered(FakeAdapter::standard()).await;
        let result = session
            .climate_control()
            .leaving_water_temperature(ClimateControlMode::Auto)
            .await;
        match result {
            Err(BridgeError::DeviceRequest { dest, details }) => {
                assert_eq!(dest, "1/Operation/LeavingWaterTemperatureAuto/la");
                assert!(details.contains("4004"));
            }
            other => panic!("expected DeviceRequest, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unanswered_request_times_out() {
        let mut fake = FakeAdapter::standard();
        fake.silent.insert("1/Sensor/OutdoorTemperature".to_string());
        let (host, _) = spawn_adapter(fake).await;
        let session = LanAdapterConnection::open(&host, Duration::from_millis(200))
            .await
            .unwrap()
            .discover()
            .await
            .unwrap();

        let result = session.climate_control().outdoor_temperature().await;
        assert!(matches!(
            result,
            Err(BridgeError::DeviceRequest { ref details, .. }) if details.contains("timed out")
        ));

        // The stale answer never arrives, later requests still work.
        assert!(session.climate_control().indoor_temperature().await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_reads_share_the_socket() {
        let mut fake = FakeAdapter::standard();
        fake.latency = Duration::from_millis(150);
        let (host, _) = spawn_adapter(fake).await;
        let session = LanAdapterConnection::open(&host, Duration::from_secs(1))
            .await
            .unwrap()
            .discover()
            .await
            .unwrap();

        let climate = session.climate_control();
        let started = tokio::time::Instant::now();
        let reads =
            futures_util::future::join_all((0..16).map(|_| climate.indoor_temperature())).await;

        for read in reads {
            assert!((read.unwrap() - 21.5).abs() < f64::EPSILON);
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn adapter_hang_up_fails_outstanding_requests() {
        let mut fake = FakeAdapter::standard();
        fake.hang_up_on = Some("1/Sensor/OutdoorTemperature".to_string());
        let (host, _) = spawn_adapter(fake).await;
        let session = LanAdapterConnection::open(&host, Duration::from_secs(5))
            .await
            .unwrap()
            .discover()
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let result = session.climate_control().outdoor_temperature().await;
        assert!(matches!(
            result,
            Err(BridgeError::DeviceRequest { ref details, .. }) if !details.contains("timed out")
        ));
        assert!(started.elapsed() < Duration::from_secs(5));

        assert!(session.climate_control().indoor_temperature().await.is_err());
    }

    #[tokio::test]
    async fn discovery_without_tank_fails() {
        let mut fake = FakeAdapter::standard();
        fake.values.remove("2/UnitProfile");
        let (host, _) = spawn_adapter(fake).await;

        let result = LanAdapterConnector::new(host, Duration::from_secs(2))
            .connect()
            .await;
        assert!(matches!(result, Err(BridgeError::DiscoveryFailed(_))));
    }

    #[tokio::test]
    async fn closed_session_rejects_requests() {
        let (session, _) = discovered(FakeAdapter::standard()).await;
        session.close().await.unwrap();

        let result = session.hot_water_tank().tank_temperature().await;
        assert!(matches!(
            result,
            Err(BridgeError::DeviceRequest { ref details, .. }) if details == "session closed"
        ));
    }

    #[tokio::test]
    async fn unreachable_adapter_fails_discovery() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = LanAdapterConnector::new(host, Duration::from_secs(1))
            .connect()
            .await;
        assert!(matches!(result, Err(BridgeError::DiscoveryFailed(_))));
    }
}
