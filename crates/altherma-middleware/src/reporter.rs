//! [`StateReporter`] – periodic device snapshot and publish.
//!
//! Each cycle fetches all attributes concurrently, formats them into an
//! [`AttributeSnapshot`] and publishes it.  A cycle is all or nothing: any
//! failed fetch aborts it before the first publish.
//!
//! Cycles start every `period`; the pause after a cycle is `period` minus the
//! time the cycle took (see [`next_sleep`]), so slow fetches do not push the
//! schedule back.

use std::sync::Arc;
use std::time::Duration;

use altherma_hal::DeviceSession;
use altherma_types::{Attribute, BridgeError, ClimateControlMode, round_to_integer};
use serde_json::{Map, Value};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::client::BusClient;
use crate::topics::TopicScheme;

/// How long to wait before the next cycle, given how long this one took.
pub fn next_sleep(period: Duration, elapsed: Duration) -> Duration {
    period.saturating_sub(elapsed)
}

/// Formatted attribute values of one cycle, in [`Attribute::ALL`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSnapshot {
    entries: Vec<(Attribute, String)>,
}

fn switch(on: bool) -> String {
    if on { "ON" } else { "OFF" }.to_string()
}

fn integer(value: f64) -> String {
    round_to_integer(value).to_string()
}

async fn field<T>(
    attribute: Attribute,
    fetch: impl Future<Output = Result<T, BridgeError>>,
) -> Result<T, BridgeError> {
    fetch.await.map_err(|e| BridgeError::DeviceFetchFailed {
        attribute: attribute.suffix().to_string(),
        details: e.to_string(),
    })
}

impl AttributeSnapshot {
    /// Read every attribute from `session`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DeviceFetchFailed`] naming the first attribute whose
    /// fetch failed.
    pub async fn fetch(session: &dyn DeviceSession) -> Result<Self, BridgeError> {
        use ClimateControlMode::{Auto, Cooling, Heating};

        let tank = session.hot_water_tank();
        let climate = session.climate_control();

        let (
            dhw_power,
            dhw_temp,
            dhw_target_temp,
            dhw_temp_heating,
            dhw_powerful,
            indoor_temp,
            outdoor_temp,
            climate_power,
            climate_mode,
            leaving_water_current,
            offset_heating,
            offset_cooling,
            offset_auto,
            leaving_water_heating,
            leaving_water_cooling,
            leaving_water_auto,
        ) = tokio::try_join!(
            field(Attribute::DhwPower, tank.is_turned_on()),
            field(Attribute::DhwTemp, tank.tank_temperature()),
            field(Attribute::DhwTargetTemp, tank.target_temperature()),
            field(
                Attribute::DhwTempHeating,
                tank.domestic_hot_water_temperature_heating()
            ),
            field(Attribute::DhwPowerful, tank.powerful()),
            field(Attribute::IndoorTemp, climate.indoor_temperature()),
            field(Attribute::OutdoorTemp, climate.outdoor_temperature()),
            field(Attribute::ClimateControlPower, climate.is_turned_on()),
            field(Attribute::ClimateControlMode, climate.operation_mode()),
            field(
                Attribute::LeavingWaterTempCurrent,
                climate.leaving_water_temperature_current()
            ),
            field(
                Attribute::LeavingWaterTempOffset(Heating),
                climate.leaving_water_temperature_offset(Heating)
            ),
            field(
                Attribute::LeavingWaterTempOffset(Cooling),
                climate.leaving_water_temperature_offset(Cooling)
            ),
            field(
                Attribute::LeavingWaterTempOffset(Auto),
                climate.leaving_water_temperature_offset(Auto)
            ),
            field(
                Attribute::LeavingWaterTemp(Heating),
                climate.leaving_water_temperature(Heating)
            ),
            field(
                Attribute::LeavingWaterTemp(Cooling),
                climate.leaving_water_temperature(Cooling)
            ),
            field(
                Attribute::LeavingWaterTemp(Auto),
                climate.leaving_water_temperature(Auto)
            ),
        )?;

        let entries = vec![
            (Attribute::DhwPower, switch(dhw_power)),
            (Attribute::DhwTemp, integer(dhw_temp)),
            (Attribute::DhwTargetTemp, integer(dhw_target_temp)),
            (Attribute::DhwTempHeating, integer(dhw_temp_heating)),
            (Attribute::DhwPowerful, switch(dhw_powerful)),
            (Attribute::IndoorTemp, format!("{indoor_temp:.1}")),
            (Attribute::OutdoorTemp, integer(outdoor_temp)),
            (
                Attribute::ClimateControlHeatingConfig,
                climate.heating_configuration().to_string(),
            ),
            (
                Attribute::ClimateControlCoolingConfig,
                climate.cooling_configuration().to_string(),
            ),
            (Attribute::ClimateControlPower, switch(climate_power)),
            (Attribute::ClimateControlMode, climate_mode.to_string()),
            (Attribute::LeavingWaterTempCurrent, integer(leaving_water_current)),
            (Attribute::LeavingWaterTempOffset(Heating), integer(offset_heating)),
            (Attribute::LeavingWaterTempOffset(Cooling), integer(offset_cooling)),
            (Attribute::LeavingWaterTempOffset(Auto), integer(offset_auto)),
            (Attribute::LeavingWaterTemp(Heating), integer(leaving_water_heating)),
            (Attribute::LeavingWaterTemp(Cooling), integer(leaving_water_cooling)),
            (Attribute::LeavingWaterTemp(Auto), integer(leaving_water_auto)),
        ];
        Ok(Self { entries })
    }

    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.entries
            .iter()
            .find(|(a, _)| *a == attribute)
            .map(|(_, value)| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Attribute, &str)> {
        self.entries.iter().map(|(a, value)| (*a, value.as_str()))
    }

    /// One JSON object keyed by attribute suffix.
    pub fn to_json(&self) -> String {
        let object: Map<String, Value> = self
            .entries
            .iter()
            .map(|(a, value)| (a.suffix().to_string(), Value::String(value.clone())))
            .collect();
        Value::Object(object).to_string()
    }
}

/// Polls the device and publishes its state.
pub struct StateReporter {
    bus: Arc<dyn BusClient>,
    session: Arc<dyn DeviceSession>,
    topics: TopicScheme,
    period: Duration,
}

impl StateReporter {
    pub fn new(
        bus: Arc<dyn BusClient>,
        session: Arc<dyn DeviceSession>,
        topics: TopicScheme,
        period: Duration,
    ) -> Self {
        Self {
            bus,
            session,
            topics,
            period,
        }
    }

    /// Fetch and publish one cycle.  Returns the number of publishes.
    ///
    /// # Errors
    ///
    /// [`BridgeError::DeviceFetchFailed`] when any fetch fails (nothing is
    /// published), or [`BridgeError::Bus`] when the client rejects a publish.
    pub async fn publish_cycle(&self) -> Result<usize, BridgeError> {
        let snapshot = AttributeSnapshot::fetch(self.session.as_ref()).await?;
        self.publish(&snapshot).await
    }

    async fn publish(&self, snapshot: &AttributeSnapshot) -> Result<usize, BridgeError> {
        if let Some(topic) = self.topics.single_topic() {
            self.bus.publish(&topic, snapshot.to_json().into_bytes()).await?;
            trace!(topic = %topic, "published state object");
            return Ok(1);
        }

        for (attribute, value) in snapshot.iter() {
            let topic = self.topics.state_topic(attribute);
            self.bus.publish(&topic, value.as_bytes().to_vec()).await?;
            trace!(topic = %topic, value, "published state");
        }
        Ok(snapshot.len())
    }

    /// Publish a cycle every `period` until `cancel` fires or a cycle fails.
    ///
    /// Cancellation is honoured while fetching and while sleeping; once a
    /// snapshot is complete it is published in full.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BridgeError> {
        info!(period = ?self.period, "state reporter started");
        loop {
            let started = Instant::now();

            let snapshot = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                snapshot = AttributeSnapshot::fetch(self.session.as_ref()) => snapshot,
            };
            let published = match snapshot {
                Ok(snapshot) => self.publish(&snapshot).await,
                Err(e) => Err(e),
            };
            if let Err(e) = published {
                error!(error = %e, "state cycle failed");
                return Err(e);
            }

            let pause = next_sleep(self.period, started.elapsed());
            debug!(pause = ?pause, "state cycle published");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }
        info!("state reporter stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use altherma_hal::{SimCall, SimDevice};

    fn reporter(bus: Arc<SimBus>, device: Arc<SimDevice>, topics: TopicScheme) -> StateReporter {
        StateReporter::new(bus, device, topics, Duration::from_secs(5))
    }

    #[test]
    fn sleep_compensates_for_cycle_time() {
        let period = Duration::from_secs(5);
        assert_eq!(next_sleep(period, Duration::from_secs(2)), Duration::from_secs(3));
        assert_eq!(next_sleep(period, Duration::ZERO), period);
        assert_eq!(next_sleep(period, Duration::from_secs(7)), Duration::ZERO);
    }

    #[tokio::test]
    async fn snapshot_formats_every_attribute() {
        let device = SimDevice::new();
        let snapshot = AttributeSnapshot::fetch(&device).await.unwrap();

        assert_eq!(snapshot.len(), Attribute::ALL.len());
        assert_eq!(snapshot.get(Attribute::DhwPower), Some("ON"));
        assert_eq!(snapshot.get(Attribute::DhwPowerful), Some("OFF"));
        assert_eq!(snapshot.get(Attribute::DhwTemp), Some("47"));
        assert_eq!(snapshot.get(Attribute::IndoorTemp), Some("21.5"));
        assert_eq!(snapshot.get(Attribute::OutdoorTemp), Some("8"));
        assert_eq!(snapshot.get(Attribute::ClimateControlMode), Some("heating"));
        assert_eq!(
            snapshot.get(Attribute::ClimateControlHeatingConfig),
            Some("weather-dependent")
        );
        assert_eq!(snapshot.get(Attribute::ClimateControlCoolingConfig), Some("fixed"));
        assert_eq!(
            snapshot.get(Attribute::LeavingWaterTemp(ClimateControlMode::Cooling)),
            Some("18")
        );
    }

    #[tokio::test]
    async fn temperatures_round_and_indoor_keeps_one_decimal() {
        let device = SimDevice::new();
        let mut state = device.snapshot();
        state.tank_temperature = 46.5;
        state.outdoor_temperature = -3.6;
        state.indoor_temperature = 20.0;
        let device = device.with_state(state);

        let snapshot = AttributeSnapshot::fetch(&device).await.unwrap();
        assert_eq!(snapshot.get(Attribute::DhwTemp), Some("46"));
        assert_eq!(snapshot.get(Attribute::OutdoorTemp), Some("-4"));
        assert_eq!(snapshot.get(Attribute::IndoorTemp), Some("20.0"));
    }

    #[tokio::test]
    async fn multi_topic_cycle_publishes_each_attribute() {
        let (bus, _source) = SimBus::channel();
        let device = Arc::new(SimDevice::new());
        let published = reporter(bus.clone(), device, TopicScheme::new("hp"))
            .publish_cycle()
            .await
            .unwrap();

        let publishes = bus.publishes();
        assert_eq!(published, Attribute::ALL.len());
        assert_eq!(publishes.len(), Attribute::ALL.len());
        assert_eq!(publishes[0].topic, "hp/state/dhw_power");
        assert_eq!(publishes[0].payload, "ON");
        assert!(
            publishes
                .iter()
                .any(|p| p.topic == "hp/state/indoor_temp" && p.payload == "21.5")
        );
    }

    #[tokio::test]
    async fn single_topic_cycle_publishes_one_object() {
        let (bus, _source) = SimBus::channel();
        let device = Arc::new(SimDevice::new());
        let topics = TopicScheme::new("hp").with_single_topic("all");
        reporter(bus.clone(), device, topics).publish_cycle().await.unwrap();

        let publishes = bus.publishes();
        assert_eq!(publishes.len(), 1);
        assert_eq!(publishes[0].topic, "hp/state/all");

        let object: Value = serde_json::from_str(&publishes[0].payload).unwrap();
        let object = object.as_object().unwrap();
        assert_eq!(object.len(), Attribute::ALL.len());
        assert_eq!(object["dhw_power"], "ON");
        assert_eq!(object["indoor_temp"], "21.5");
        for attribute in Attribute::ALL {
            assert!(object[attribute.suffix()].is_string());
        }
    }

    #[tokio::test]
    async fn failed_fetch_publishes_nothing() {
        let (bus, _source) = SimBus::channel();
        let device = Arc::new(SimDevice::new().failing_on("outdoor_temperature"));
        let result = reporter(bus.clone(), device, TopicScheme::new("hp"))
            .publish_cycle()
            .await;

        match result {
            Err(BridgeError::DeviceFetchFailed { attribute, .. }) => {
                assert_eq!(attribute, "outdoor_temp");
            }
            other => panic!("expected DeviceFetchFailed, got {other:?}"),
        }
        assert!(bus.publishes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cadence_corrects_for_fetch_time() {
        let (bus, _source) = SimBus::channel();
        let device = Arc::new(SimDevice::new().with_fetch_delay(Duration::from_secs(2)));
        let topics = TopicScheme::new("hp").with_single_topic("all");
        let reporter = reporter(bus.clone(), device, topics);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { reporter.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        let offsets: Vec<Duration> = bus.publishes().iter().map(|p| p.at - start).collect();
        assert_eq!(
            offsets,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(7),
                Duration::from_secs(12)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_failed_cycle() {
        let (bus, _source) = SimBus::channel();
        let device = Arc::new(SimDevice::new().failing_on("powerful"));
        let result = reporter(bus.clone(), device, TopicScheme::default())
            .run(CancellationToken::new())
            .await;

        assert!(matches!(result, Err(BridgeError::DeviceFetchFailed { .. })));
        assert!(bus.publishes().is_empty());
    }

    #[tokio::test]
    async fn next_cycle_reflects_mode_getter() {
        let (bus, _source) = SimBus::channel();
        let device = Arc::new(SimDevice::new());
        reporter(bus, device.clone(), TopicScheme::default())
            .publish_cycle()
            .await
            .unwrap();

        assert!(device.calls().contains(&SimCall::get("operation_mode")));
    }
}
