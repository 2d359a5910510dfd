use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Timer};

use crate::bus::{BusArbiter, SharedBus};
use crate::config::{
    ACQUISITION_PERIOD_MS, BUS_ACQUIRE_TIMEOUT_MS, CHANNELS_PER_CONVERTER, CURRENT_SOURCE_ADDRESS,
    CURRENT_SOURCE_INVERT, CURRENT_SOURCE_MAX_CURRENT, DELTAS_PER_STATE, ELECTRODE_COUNT,
    MEASUREMENT_LEN,
};
use crate::drivers::{AnalogConverter, CurrentSource, Multiplexer};
use crate::error::{DeviceError, Result};
use crate::ipc::PublishChannel;
use crate::scanner::{
    extract_deltas, next_excitation_state, Converter, ElectrodeMap, ExcitationState, Measurement,
    RawChannels,
};
use crate::{log_debug, log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum AcquisitionState {
    BusInit,
    Energize,
    Sample,
    Publish,
}

/// Outcome of one state evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub enum AcquisitionEvent {
    /// The bus could not be acquired in time.
    BusBusy,
    /// A device call failed inside the session.
    DeviceFailed,
    FrontEndReady,
    Energized,
    Sampled { cycle_complete: bool },
    Published,
    /// The reader holds the buffer.
    PublishDeferred,
}

impl AcquisitionState {
    /// Failures never move the machine; the same state is retried next tick.
    pub fn next(self, event: AcquisitionEvent) -> Self {
        use AcquisitionEvent::*;
        use AcquisitionState::*;

        match (self, event) {
            (_, BusBusy) | (_, DeviceFailed) | (_, PublishDeferred) => self,
            (BusInit, FrontEndReady) => Energize,
            (Energize, Energized) => Sample,
            (Sample, Sampled { cycle_complete: true }) => Publish,
            (Sample, Sampled { cycle_complete: false }) => Energize,
            (Publish, Published) => Energize,
            // Events that do not belong to the current state
            (state, _) => state,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub struct AcquisitionStats {
    pub cycles: u32,
    pub published: u32,
    pub busy_ticks: u32,
    pub device_errors: u32,
    pub deferred_publishes: u32,
}

/// Producer side of the scan: walks all 16 excitation states, accumulates
/// one 208-sample measurement and hands it to the [`PublishChannel`].
pub struct AcquisitionEngine {
    state: AcquisitionState,
    excitation: ExcitationState,
    accumulator: Measurement,
    map: ElectrodeMap,
    bus_timeout: Duration,
    stats: AcquisitionStats,
    consecutive_errors: u32,
}

impl AcquisitionEngine {
    pub fn new(map: ElectrodeMap) -> Self {
        Self {
            state: AcquisitionState::BusInit,
            excitation: ExcitationState::first(),
            accumulator: [0.0; MEASUREMENT_LEN],
            map,
            bus_timeout: Duration::from_millis(BUS_ACQUIRE_TIMEOUT_MS),
            stats: AcquisitionStats::default(),
            consecutive_errors: 0,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Excitation state the next `Energize` will apply.
    pub fn excitation(&self) -> ExcitationState {
        self.excitation
    }

    pub fn accumulator(&self) -> &Measurement {
        &self.accumulator
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    /// Evaluate the current state once and return the state for the next tick.
    pub async fn tick<M, B, C, S, X, O>(
        &mut self,
        arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
        publish: &PublishChannel,
    ) -> AcquisitionState
    where
        M: RawMutex,
        C: AnalogConverter<B>,
        S: CurrentSource<B>,
        X: Multiplexer,
    {
        let event = match self.state {
            AcquisitionState::BusInit => self.bus_init(arbiter).await,
            AcquisitionState::Energize => self.energize(arbiter).await,
            AcquisitionState::Sample => self.sample(arbiter).await,
            AcquisitionState::Publish => self.publish(publish),
        };
        self.record(event);
        self.state = self.state.next(event);
        self.state
    }

    fn record(&mut self, event: AcquisitionEvent) {
        match event {
            AcquisitionEvent::BusBusy => {
                self.stats.busy_ticks = self.stats.busy_ticks.wrapping_add(1);
            }
            AcquisitionEvent::DeviceFailed => {
                self.stats.device_errors = self.stats.device_errors.wrapping_add(1);
                self.consecutive_errors = self.consecutive_errors.wrapping_add(1);
            }
            AcquisitionEvent::PublishDeferred => {
                self.stats.deferred_publishes = self.stats.deferred_publishes.wrapping_add(1);
            }
            AcquisitionEvent::Published => {
                self.stats.published = self.stats.published.wrapping_add(1);
            }
            _ => {
                if self.consecutive_errors > 0 {
                    log_info!(
                        "Acquisition recovered after {} device errors",
                        self.consecutive_errors
                    );
                    self.consecutive_errors = 0;
                }
            }
        }
    }

    fn device_failed(&self, what: &str, err: DeviceError) -> AcquisitionEvent {
        // Logged on the first failure and every 100th after that
        if self.consecutive_errors % 100 == 0 {
            log_warn!("{} failed in {:?}: {:?}", what, self.state, err);
        }
        AcquisitionEvent::DeviceFailed
    }

    async fn bus_init<M, B, C, S, X, O>(
        &mut self,
        arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
    ) -> AcquisitionEvent
    where
        M: RawMutex,
        C: AnalogConverter<B>,
        S: CurrentSource<B>,
    {
        let Some(mut session) = arbiter.acquire(self.bus_timeout).await else {
            return AcquisitionEvent::BusBusy;
        };
        let devices = &mut *session;

        let result: Result<()> = async {
            devices.converter_a.configure_single_ended();
            devices.converter_a.begin(&mut devices.bus).await?;
            devices.converter_b.configure_single_ended();
            devices.converter_b.begin(&mut devices.bus).await?;
            devices
                .current_source
                .init(
                    &mut devices.bus,
                    CURRENT_SOURCE_ADDRESS,
                    CURRENT_SOURCE_MAX_CURRENT,
                    CURRENT_SOURCE_INVERT,
                )
                .await
        }
        .await;
        session.release();

        match result {
            Ok(()) => {
                self.excitation = ExcitationState::first();
                log_info!("Electrode front end initialized");
                AcquisitionEvent::FrontEndReady
            }
            Err(e) => {
                log_error!("Front end initialization failed: {:?}", e);
                AcquisitionEvent::DeviceFailed
            }
        }
    }

    async fn energize<M, B, C, S, X, O>(
        &mut self,
        arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
    ) -> AcquisitionEvent
    where
        M: RawMutex,
        S: CurrentSource<B>,
        X: Multiplexer,
    {
        let Some(mut session) = arbiter.acquire(self.bus_timeout).await else {
            return AcquisitionEvent::BusBusy;
        };
        let devices = &mut *session;
        let ExcitationState { ground, current } = self.excitation;

        // The new ground electrode was the previous state's current electrode
        let result: Result<()> = async {
            devices
                .current_source
                .disable_channel(&mut devices.bus, self.map.current_channel(ground))
                .await?;
            devices.mux.select_channel(ground)?;
            devices
                .current_source
                .enable_channel(&mut devices.bus, self.map.current_channel(current))
                .await
        }
        .await;
        session.release();

        match result {
            Ok(()) => AcquisitionEvent::Energized,
            Err(e) => self.device_failed("Energize", e),
        }
    }

    async fn sample<M, B, C, S, X, O>(
        &mut self,
        arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
    ) -> AcquisitionEvent
    where
        M: RawMutex,
        C: AnalogConverter<B>,
    {
        let Some(mut session) = arbiter.acquire(self.bus_timeout).await else {
            return AcquisitionEvent::BusBusy;
        };
        let devices = &mut *session;
        let mut raw: RawChannels = [0.0; ELECTRODE_COUNT];

        let result: Result<()> = async {
            for i in 0..CHANNELS_PER_CONVERTER as u8 {
                let channel = CHANNELS_PER_CONVERTER as u8 - 1 - i;
                raw[self.map.electrode(Converter::A, channel)] =
                    devices.converter_a.read_channel(&mut devices.bus, channel).await?;
                raw[self.map.electrode(Converter::B, channel)] =
                    devices.converter_b.read_channel(&mut devices.bus, channel).await?;
            }
            Ok::<(), DeviceError>(())
        }
        .await;
        session.release();

        if let Err(e) = result {
            return self.device_failed("Sample", e);
        }

        let ExcitationState { ground, current } = self.excitation;
        let offset = self.excitation.offset();
        self.accumulator[offset..offset + DELTAS_PER_STATE]
            .copy_from_slice(&extract_deltas(&raw, current));

        self.excitation = next_excitation_state(ground);
        let cycle_complete = self.excitation.ground == 0;
        if cycle_complete {
            self.stats.cycles = self.stats.cycles.wrapping_add(1);
            log_debug!("Scan cycle {} complete", self.stats.cycles);
        }
        AcquisitionEvent::Sampled { cycle_complete }
    }

    fn publish(&mut self, channel: &PublishChannel) -> AcquisitionEvent {
        if channel.try_publish(&self.accumulator) {
            AcquisitionEvent::Published
        } else {
            AcquisitionEvent::PublishDeferred
        }
    }
}

/// Drive the engine forever at the acquisition cadence.
pub async fn run<M, B, C, S, X, O>(
    mut engine: AcquisitionEngine,
    arbiter: &BusArbiter<M, SharedBus<B, C, S, X, O>>,
    publish: &PublishChannel,
)
where
    M: RawMutex,
    C: AnalogConverter<B>,
    S: CurrentSource<B>,
    X: Multiplexer,
{
    log_info!(
        "Acquisition task started - stepping every {}ms",
        ACQUISITION_PERIOD_MS
    );
    let period = Duration::from_millis(ACQUISITION_PERIOD_MS);

    loop {
        engine.tick(arbiter, publish).await;
        Timer::after(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{
        DeviceCall, Journal, MockConverter, MockCurrentSource, MockMux, MockOrientation,
    };
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    type Devices = SharedBus<(), MockConverter, MockCurrentSource, MockMux, MockOrientation>;
    type Arbiter = BusArbiter<CriticalSectionRawMutex, Devices>;

    const A: u8 = 0;
    const B: u8 = 1;

    fn devices(journal: &Journal) -> Devices {
        let mut converter_a = MockConverter::new(A, journal.clone());
        let mut converter_b = MockConverter::new(B, journal.clone());
        for ch in 0..8 {
            // Electrode e reads e * e / 10 volts under the default wiring
            let ea = 7 - ch;
            let eb = 15 - ch;
            converter_a.volts[ch] = (ea * ea) as f32 / 10.0;
            converter_b.volts[ch] = (eb * eb) as f32 / 10.0;
        }
        SharedBus {
            bus: (),
            converter_a,
            converter_b,
            current_source: MockCurrentSource::new(journal.clone()),
            mux: MockMux::new(journal.clone()),
            orientation: MockOrientation::new(journal.clone()),
        }
    }

    fn expected_raw() -> RawChannels {
        let mut raw = [0.0; 16];
        for (e, v) in raw.iter_mut().enumerate() {
            *v = (e * e) as f32 / 10.0;
        }
        raw
    }

    #[test]
    fn transitions_follow_the_loop() {
        use AcquisitionEvent::*;
        use AcquisitionState::*;

        assert_eq!(BusInit.next(BusBusy), BusInit);
        assert_eq!(BusInit.next(DeviceFailed), BusInit);
        assert_eq!(BusInit.next(FrontEndReady), Energize);
        assert_eq!(Energize.next(Energized), Sample);
        assert_eq!(Sample.next(Sampled { cycle_complete: false }), Energize);
        assert_eq!(Sample.next(Sampled { cycle_complete: true }), Publish);
        assert_eq!(Publish.next(PublishDeferred), Publish);
        assert_eq!(Publish.next(Published), Energize);
        assert_eq!(Energize.next(Published), Energize);
    }

    #[test]
    fn busy_bus_blocks_init_without_device_calls() {
        let journal = Journal::new();
        let arbiter = Arbiter::new(devices(&journal));
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());

        let held = arbiter.try_acquire().unwrap();
        for _ in 0..3 {
            assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::BusInit);
        }
        assert!(journal.calls().is_empty());
        assert_eq!(engine.stats().busy_ticks, 3);
        held.release();

        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Energize);
        assert_eq!(
            journal.take(),
            std::vec![
                DeviceCall::ConverterMode(A),
                DeviceCall::ConverterBegin(A),
                DeviceCall::ConverterMode(B),
                DeviceCall::ConverterBegin(B),
                DeviceCall::SourceInit {
                    address: CURRENT_SOURCE_ADDRESS,
                    max_current: CURRENT_SOURCE_MAX_CURRENT,
                    invert: CURRENT_SOURCE_INVERT,
                },
            ]
        );
    }

    #[test]
    fn busy_counter_wraps() {
        let journal = Journal::new();
        let arbiter = Arbiter::new(devices(&journal));
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());
        engine.stats.busy_ticks = u32::MAX;

        let held = arbiter.try_acquire().unwrap();
        block_on(engine.tick(&arbiter, &publish));
        held.release();
        assert_eq!(engine.stats().busy_ticks, 0);
    }

    #[test]
    fn failed_init_is_retried() {
        let journal = Journal::new();
        let mut shared = devices(&journal);
        shared.converter_b.fail = true;
        let arbiter = Arbiter::new(shared);
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());

        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::BusInit);
        assert_eq!(engine.stats().device_errors, 1);
        // The bus is released even though init failed
        arbiter.try_acquire().unwrap().converter_b.fail = false;
        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Energize);
    }

    #[test]
    fn energize_switches_off_new_ground_then_selects_and_drives() {
        let journal = Journal::new();
        let arbiter = Arbiter::new(devices(&journal));
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());

        block_on(engine.tick(&arbiter, &publish));
        journal.clear();
        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Sample);
        assert_eq!(
            journal.take(),
            std::vec![
                DeviceCall::SourceDisable(0),
                DeviceCall::MuxSelect(0),
                DeviceCall::SourceEnable(1),
            ]
        );
    }

    #[test]
    fn sample_reads_descending_channels_interleaved() {
        let journal = Journal::new();
        let arbiter = Arbiter::new(devices(&journal));
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());

        block_on(engine.tick(&arbiter, &publish));
        block_on(engine.tick(&arbiter, &publish));
        journal.clear();
        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Energize);

        let calls = journal.take();
        assert_eq!(calls.len(), 16);
        for i in 0..8u8 {
            assert_eq!(
                calls[2 * i as usize],
                DeviceCall::ConverterRead { converter: A, channel: 7 - i }
            );
            assert_eq!(
                calls[2 * i as usize + 1],
                DeviceCall::ConverterRead { converter: B, channel: 7 - i }
            );
        }
        assert_eq!(engine.excitation(), ExcitationState::with_ground(1));
    }

    #[test]
    fn failed_sample_keeps_excitation() {
        let journal = Journal::new();
        let arbiter = Arbiter::new(devices(&journal));
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());

        block_on(engine.tick(&arbiter, &publish));
        block_on(engine.tick(&arbiter, &publish));
        arbiter.try_acquire().unwrap().converter_a.fail = true;
        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Sample);
        assert_eq!(engine.excitation(), ExcitationState::first());

        arbiter.try_acquire().unwrap().converter_a.fail = false;
        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Energize);
    }

    #[test]
    fn full_cycle_fills_every_offset_and_publishes() {
        let journal = Journal::new();
        let arbiter = Arbiter::new(devices(&journal));
        let publish = PublishChannel::new();
        let mut engine = AcquisitionEngine::new(ElectrodeMap::default());

        block_on(engine.tick(&arbiter, &publish));
        let mut grounds = std::vec::Vec::new();
        for _ in 0..16 {
            grounds.push(engine.excitation().ground);
            assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Sample);
            block_on(engine.tick(&arbiter, &publish));
        }
        assert_eq!(grounds, (0..16).collect::<std::vec::Vec<u8>>());
        assert_eq!(engine.state(), AcquisitionState::Publish);
        assert_eq!(engine.stats().cycles, 1);

        let raw = expected_raw();
        for g in 0..16u8 {
            let state = ExcitationState::with_ground(g);
            let expected = extract_deltas(&raw, state.current);
            assert_eq!(
                &engine.accumulator()[state.offset()..state.offset() + 13],
                &expected[..]
            );
        }

        // A reader holding the buffer defers the publish
        let reader = publish.try_begin_read().unwrap();
        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Publish);
        reader.end_read();
        assert_eq!(engine.stats().deferred_publishes, 1);

        assert_eq!(block_on(engine.tick(&arbiter, &publish)), AcquisitionState::Energize);
        let (sequence, frame) = publish.try_snapshot().unwrap();
        assert_eq!(sequence, 1);
        assert_eq!(&frame.samples[..], &engine.accumulator()[..]);
        assert_eq!(engine.excitation(), ExcitationState::first());
    }
}
