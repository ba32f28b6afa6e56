//! Drives the monitor against the simulated beamline with synthetic time.

use std::{
    fs,
    path::PathBuf,
    sync::atomic::AtomicBool,
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use qbpm_feedback::{
    advanced::simulation::{DEFAULT_BACKLASH, MotorWrite, SimBeamline, SimPitchMotor, SimQbpm},
    component_a::{history::BandLog, sensor::Signal},
    component_b::feedback::TickOutcome,
    error::FeedbackError,
    monitor::{Command, Monitor, Step},
    utils::config::MonitorConfig,
};

const T0: f64 = 1_700_000_000.0;
const DT: f64 = 0.25;

fn scratch(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("qbpm_it_{}_{}_{}", name, std::process::id(), nanos))
}

fn config() -> MonitorConfig {
    MonitorConfig {
        filter_strength: 100,
        log_path: None,
        trigger_file: None,
        ..MonitorConfig::default()
    }
}

struct Clock(u32);

impl Clock {
    fn step(&mut self, m: &mut Monitor<SimQbpm, SimPitchMotor>) -> Step {
        self.0 += 1;
        m.step_at(T0 + f64::from(self.0) * DT)
    }

    fn run(&mut self, m: &mut Monitor<SimQbpm, SimPitchMotor>, n: u32) {
        for _ in 0..n {
            self.step(m);
        }
    }
}

fn started(sim: &SimBeamline, config: &MonitorConfig) -> (Monitor<SimQbpm, SimPitchMotor>, Clock) {
    let mut m = Monitor::new(sim.qbpm(), sim.pitch_motor(), config).unwrap();
    let mut clock = Clock(0);
    m.start_polling();
    clock.run(&mut m, 5);
    (m, clock)
}

#[test]
fn feedback_cancels_a_step_in_beam_position() {
    let sim = SimBeamline::new(11);
    let (mut m, mut clock) = started(&sim, &config());
    m.enable_feedback().unwrap();
    let target = m.store().target(Signal::PosV).unwrap();
    assert_eq!(target, 0.0);

    sim.set_drift(0.05);
    clock.run(&mut m, 200);

    assert!(m.feedback_enabled());
    assert!(m.controller().moves() > 0);
    assert!((sim.ideal_pos_v() - target).abs() < 5e-4, "residual {}", sim.ideal_pos_v());
    assert!(sim.pitch() < 0.0);
    // backlash compensation is restored after every move
    assert_eq!(sim.backlash(), DEFAULT_BACKLASH);
    assert_eq!(sim.writes().last(), Some(&MotorWrite::Backlash(DEFAULT_BACKLASH)));
    assert!(m.store().is_consistent());
}

#[test]
fn one_move_per_actuation_interval() {
    let sim = SimBeamline::new(5);
    let (mut m, mut clock) = started(&sim, &config());
    m.enable_feedback().unwrap();
    assert_eq!(m.controller().actuation_interval(), 5);

    sim.set_drift(0.05);
    let mut moved_at = Vec::new();
    for i in 1..=20 {
        if let Step::Sampled(outcome) = clock.step(&mut m) {
            if outcome.moved() {
                moved_at.push(i);
            }
        }
    }
    assert_eq!(moved_at, vec![5, 10, 15, 20]);
    assert_eq!(sim.position_writes().len(), 4);
}

#[test]
fn dry_run_leaves_the_motor_alone() {
    let sim = SimBeamline::new(3);
    let (mut m, mut clock) = started(&sim, &MonitorConfig { dry_run: true, ..config() });
    m.enable_feedback().unwrap();
    sim.set_drift(0.05);

    let mut dry = 0;
    for _ in 0..50 {
        if let Step::Sampled(TickOutcome::DryRun { correction }) = clock.step(&mut m) {
            assert!(correction < 0.0);
            dry += 1;
        }
    }
    assert_eq!(dry, 10);
    assert!(sim.writes().is_empty());
    assert_eq!(sim.pitch(), 0.0);
}

#[test]
fn motor_fault_switches_feedback_off() {
    let sim = SimBeamline::new(9);
    let (mut m, mut clock) = started(&sim, &config());
    m.enable_feedback().unwrap();
    sim.set_drift(0.05);
    sim.set_fail_writes(true);

    let tripped = (0..10).map(|_| clock.step(&mut m)).find(|s| matches!(s, Step::Tripped(_)));
    assert!(matches!(tripped, Some(Step::Tripped(FeedbackError::ActuatorWriteFailed(_)))));
    assert!(!m.feedback_enabled());
    assert!(m.is_polling());
    assert!(!m.store().feedback_enabled());
}

#[test]
fn dropouts_never_poison_the_logs() {
    let sim = SimBeamline::new(21).with_noise(1e-3);
    let (mut m, mut clock) = started(&sim, &config());
    sim.set_dropout(0.2);
    clock.run(&mut m, 300);
    sim.set_dropout(0.0);
    clock.run(&mut m, 3);

    let store = m.store();
    assert!(store.is_consistent());
    assert!(store.latest_filtered(Signal::PosV).unwrap().is_finite());
    assert!(store.latest_filtered(Signal::PosH).unwrap().is_finite());
    assert!(store.raw(Signal::PosV).iter().any(f64::is_nan));
}

#[test]
fn dropout_of_intensity_trips_feedback() {
    let sim = SimBeamline::new(2);
    let (mut m, mut clock) = started(&sim, &config());
    m.enable_feedback().unwrap();
    sim.set_dropout(1.0);
    assert!(matches!(clock.step(&mut m), Step::Tripped(FeedbackError::LowSignal { .. })));
    assert!(!m.feedback_enabled());
}

#[test]
fn row_log_follows_logging_switch() {
    let sim = SimBeamline::new(4);
    let path = scratch("rows").join("log.csv");
    let cfg = MonitorConfig { log_path: Some(path.clone()), ..config() };
    let (mut m, mut clock) = started(&sim, &cfg);
    assert!(m.is_logging());

    m.commands().send(Command::SetLogging(false)).unwrap();
    clock.run(&mut m, 4);
    assert!(!m.is_logging());

    m.commands().send(Command::SetLogging(true)).unwrap();
    clock.run(&mut m, 2);

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "timestamp qbpm_avgcurr qbpm_x qbpm_z petra_curr");
    // 5 rows before the switch, 2 after
    assert_eq!(lines.len(), 1 + 5 + 2);
    let _ = fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn sentinel_file_toggles_feedback() {
    let sim = SimBeamline::new(6);
    let sentinel = scratch("sentinel");
    let cfg = MonitorConfig { trigger_file: Some(sentinel.clone()), ..config() };
    let (mut m, mut clock) = started(&sim, &cfg);

    fs::write(&sentinel, b"").unwrap();
    clock.step(&mut m);
    assert!(m.feedback_enabled());
    assert!(!sentinel.exists());

    fs::write(&sentinel, b"").unwrap();
    clock.step(&mut m);
    assert!(!m.feedback_enabled());
}

#[test]
fn rate_and_backlog_commands_resize_history() {
    let sim = SimBeamline::new(8);
    let (mut m, mut clock) = started(&sim, &config());
    assert_eq!(m.store().capacity(), 600);

    m.commands().send(Command::SetFrequency(10.0)).unwrap();
    clock.step(&mut m);
    assert_eq!(m.store().frequency(), 6.0);
    assert_eq!(m.store().capacity(), 720);

    m.commands().send(Command::SetBacklog(1.0)).unwrap();
    clock.step(&mut m);
    // raised to ceil(40 samples / 6 Hz) = 7 s
    assert_eq!(m.store().backlog_seconds(), 7.0);
    assert_eq!(m.store().capacity(), 42);
    assert!(m.store().capacity() >= m.store().min_capacity());
    assert!(m.store().is_consistent());
}

#[test]
fn operator_target_is_chased() {
    let sim = SimBeamline::new(12);
    let (mut m, mut clock) = started(&sim, &config());
    m.enable_feedback().unwrap();
    m.commands().send(Command::SetTarget(Signal::PosV, 0.02)).unwrap();
    clock.run(&mut m, 200);
    assert!((sim.ideal_pos_v() - 0.02).abs() < 5e-4);
    let low = m.store().band(BandLog::Low).last();
    assert!((low - (0.02 - 3e-4)).abs() < 1e-12);
}

#[test]
fn run_stops_on_shutdown() {
    let sim = SimBeamline::new(1);
    let mut m = Monitor::new(sim.qbpm(), sim.pitch_motor(), &config()).unwrap();
    let tx = m.commands();
    tx.send(Command::TogglePolling).unwrap();
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        tx.send(Command::Shutdown).unwrap();
    });

    let running = AtomicBool::new(true);
    m.run(&running);
    stopper.join().unwrap();

    assert!(m.is_shutdown());
    assert!(!m.is_polling());
    assert!(m.samples() >= 1);
}
