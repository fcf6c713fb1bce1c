//! Pulse-train dispatcher against the simulated digital-IO box.

use daq_core::clock::{ManualClock, TokioClock};
use daq_core::error::DaqError;
use daq_driver_mock::{ErrorConfig, ErrorScenario, MockDigitalIo, TrainCompletion};
use daq_experiment::{
    DispatcherState, PulseTrainDispatcher, PulseTrainRequest, PulseTrainSettings, RunContext,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn dispatcher_with(
    io: &MockDigitalIo,
    settings: PulseTrainSettings,
) -> (ManualClock, PulseTrainDispatcher) {
    let clock = ManualClock::new();
    let dispatcher = PulseTrainDispatcher::new(
        Arc::new(io.clone()),
        settings,
        RunContext::new(Arc::new(clock.clone())),
    )
    .unwrap();
    (clock, dispatcher)
}

fn request() -> PulseTrainRequest {
    PulseTrainRequest::new(10.0, 20).unwrap()
}

#[tokio::test]
async fn completes_after_three_polls_and_idles_only_after_disarm() {
    let io = MockDigitalIo::builder().busy_polls(3).build();
    let (clock, mut dispatcher) = dispatcher_with(&io, PulseTrainSettings::default());

    dispatcher.arm(&request()).await.unwrap();
    dispatcher.fire().await.unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    let polls = dispatcher.await_completion().await.unwrap();
    assert_eq!(polls, 3);
    assert_eq!(dispatcher.state(), DispatcherState::Armed);
    assert_eq!(io.attribute("Port_1_6").await, Some(json!(true)));

    dispatcher.disarm().await.unwrap();
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    assert_eq!(io.attribute("Port_1_6").await, Some(json!(false)));

    let poll = Duration::from_millis(200);
    assert_eq!(
        clock.sleeps(),
        vec![Duration::from_secs(2), poll, poll, poll, Duration::from_secs(1)]
    );
}

#[tokio::test]
async fn dispatch_runs_the_whole_cycle() {
    let io = MockDigitalIo::builder().busy_polls(5).build();
    let (_, mut dispatcher) = dispatcher_with(&io, PulseTrainSettings::default());

    let polls = dispatcher.dispatch(&request()).await.unwrap();

    assert_eq!(polls, 5);
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    assert_eq!(io.trains_fired().await, 1);

    let lines: Vec<_> = io
        .writes()
        .await
        .into_iter()
        .filter(|(name, _)| name == "Port_1_6")
        .map(|(_, value)| value)
        .collect();
    assert_eq!(lines, vec![json!(true), json!(false)]);
}

#[tokio::test]
async fn timeout_forces_disarm() {
    let io = MockDigitalIo::stuck();
    let settings = PulseTrainSettings {
        timeout: Some(Duration::from_secs(1)),
        ..Default::default()
    };
    let (clock, mut dispatcher) = dispatcher_with(&io, settings);

    let err = dispatcher.dispatch(&request()).await.unwrap_err();

    match err {
        DaqError::PulseTrainTimeout { waited } => assert!(waited >= Duration::from_secs(1)),
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(io.attribute("Port_1_6").await, Some(json!(false)));
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    // arm settle, then five 200 ms polls before the bound is reached
    assert_eq!(clock.sleeps().len(), 6);
}

#[tokio::test]
async fn fault_state_is_a_device_error_after_forced_disarm() {
    let io = MockDigitalIo::builder()
        .completion(TrainCompletion::Fault)
        .build();
    let (_, mut dispatcher) = dispatcher_with(&io, PulseTrainSettings::default());

    let err = dispatcher.dispatch(&request()).await.unwrap_err();

    assert!(matches!(err, DaqError::DeviceCommand { .. }));
    assert!(err.to_string().contains("fault"));
    assert_eq!(io.attribute("Port_1_6").await, Some(json!(false)));
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
}

#[tokio::test]
async fn failed_trigger_closes_the_shutter() {
    let io = MockDigitalIo::builder()
        .error_config(ErrorConfig::scenario(ErrorScenario::Timeout {
            operation: "train_async",
        }))
        .build();
    let (_, mut dispatcher) = dispatcher_with(&io, PulseTrainSettings::default());

    let err = dispatcher.dispatch(&request()).await.unwrap_err();

    assert!(matches!(err, DaqError::DeviceCommand { ref operation, .. } if operation == "train_async"));
    assert_eq!(io.attribute("Port_1_6").await, Some(json!(false)));
    assert_eq!(io.trains_fired().await, 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_arm_settle() {
    let io = MockDigitalIo::new();
    let ctx = RunContext::new(Arc::new(TokioClock::new()));
    let canceller = ctx.clone();
    let mut dispatcher =
        PulseTrainDispatcher::new(Arc::new(io.clone()), PulseTrainSettings::default(), ctx)
            .unwrap();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });

    let err = dispatcher.dispatch(&request()).await.unwrap_err();

    assert!(err.is_abort());
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    assert_eq!(io.trains_fired().await, 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_while_polling_leaves_shutter_open() {
    let io = MockDigitalIo::stuck();
    let ctx = RunContext::new(Arc::new(TokioClock::new()));
    let canceller = ctx.clone();
    let mut dispatcher =
        PulseTrainDispatcher::new(Arc::new(io.clone()), PulseTrainSettings::default(), ctx)
            .unwrap();

    // 2 s arm settle, then polling every 200 ms
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2_500)).await;
        canceller.cancel();
    });

    let err = dispatcher.dispatch(&request()).await.unwrap_err();

    assert!(matches!(err, DaqError::SequenceAbort { .. }));
    assert_eq!(io.trains_fired().await, 1);
    assert_eq!(dispatcher.state(), DispatcherState::Running);

    let lines: Vec<_> = io
        .writes()
        .await
        .into_iter()
        .filter(|(name, _)| name == "Port_1_6")
        .map(|(_, value)| value)
        .collect();
    assert_eq!(lines, vec![json!(true)]);
}
