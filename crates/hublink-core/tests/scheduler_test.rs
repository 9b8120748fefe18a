#![allow(clippy::unwrap_used)]
// Integration tests for the periodic reconciliation scheduler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use pretty_assertions::assert_eq;

use common::World;
use hublink_core::{
    CoreError, MemoryStateStore, Pending, PropertyId, PropertyState, PropertyStateStore,
    PropertyValue, Reconciler, Scheduler, StateGuard, StateUpdate, TickOutcome,
    WriteQueueReceiver, WriterTiming, write_queue,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn scheduler(world: &World, timing: WriterTiming) -> (Scheduler, WriteQueueReceiver) {
    let (queue, rx) = write_queue();
    (
        Scheduler::new(world.reconciler(), world.index(), queue, timing),
        rx,
    )
}

fn ms(n: i64) -> TimeDelta {
    TimeDelta::milliseconds(n)
}

/// Tick every `tick` from `start` (exclusive) until a command shows up
/// or `limit` has passed. Returns the time of the writing tick.
async fn tick_until_write(
    scheduler: &mut Scheduler,
    start: DateTime<Utc>,
    tick: TimeDelta,
    limit: TimeDelta,
) -> Option<DateTime<Utc>> {
    let mut now = start;
    while now - start <= limit {
        now += tick;
        if let TickOutcome::Written(_) = scheduler.tick(now).await.unwrap() {
            return Some(now);
        }
    }
    None
}

/// State store whose reads fail for one property.
struct FailingReads {
    inner: MemoryStateStore,
    broken: PropertyId,
}

#[async_trait]
impl PropertyStateStore for FailingReads {
    async fn read(&self, property: PropertyId) -> Result<Option<PropertyState>, CoreError> {
        if property == self.broken {
            return Err(CoreError::StateRead {
                property,
                message: "backend timeout".into(),
            });
        }
        self.inner.read(property).await
    }

    async fn update(
        &self,
        property: PropertyId,
        update: StateUpdate,
    ) -> Result<PropertyState, CoreError> {
        self.inner.update(property, update).await
    }

    async fn update_if(
        &self,
        property: PropertyId,
        guard: &StateGuard,
        update: StateUpdate,
    ) -> Result<Option<PropertyState>, CoreError> {
        self.inner.update_if(property, guard, update).await
    }
}

// ── Single writes ───────────────────────────────────────────────────

#[tokio::test]
async fn test_requested_property_is_written_once() {
    let world = World::new();
    let device = world.device("thermostat");
    let property = world.dynamic(device);
    world.states.request_write(property, PropertyValue::Float(21.5));

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let t = Utc::now();

    assert_eq!(scheduler.tick(t).await.unwrap(), TickOutcome::Written(device));
    let commands = rx.drain();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].property(), property);
    assert_eq!(commands[0].device(), device);
    assert_eq!(commands[0].value(), Some(&PropertyValue::Float(21.5)));
    assert_eq!(world.states.get(property).unwrap().pending, Pending::DispatchedAt(t));

    // Pass reset, then a debounced visit.
    assert_eq!(scheduler.tick(t + ms(10)).await.unwrap(), TickOutcome::PassCompleted);
    assert_eq!(scheduler.tick(t + ms(20)).await.unwrap(), TickOutcome::Idle);
    assert!(rx.try_next().is_none());
}

#[tokio::test]
async fn test_property_without_expected_value_is_skipped() {
    let world = World::new();
    let device = world.device("dimmer");
    let empty = world.dynamic(device);
    let wanted = world.dynamic(device);
    world.states.confirm(empty, PropertyValue::Int(0));
    world.states.request_write(wanted, PropertyValue::Int(5));

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let t = Utc::now();

    assert!(scheduler.try_write_device(device, t).await.unwrap());
    let commands = rx.drain();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].property(), wanted);
    assert_eq!(scheduler.last_attempt(empty), Some(t));
}

#[tokio::test]
async fn test_idle_and_confirmed_states_are_never_written() {
    let world = World::new();
    let device = world.device("relay");
    let idle = world.dynamic(device);
    let confirmed = world.dynamic(device);
    world.states.insert(
        idle,
        PropertyState {
            expected_value: Some(PropertyValue::Bool(true)),
            pending: Pending::Idle,
            ..PropertyState::default()
        },
    );
    world.states.request_write(confirmed, PropertyValue::Bool(false));
    world.states.confirm(confirmed, PropertyValue::Bool(false));

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let start = Utc::now();

    assert_eq!(
        tick_until_write(&mut scheduler, start, ms(10), ms(10_000)).await,
        None
    );
    assert!(rx.try_next().is_none());
}

// ── Debounce and staleness ──────────────────────────────────────────

#[tokio::test]
async fn test_stale_dispatch_is_resent_after_deadline() {
    let world = World::new();
    let device = world.device("valve");
    let property = world.dynamic(device);
    world.states.request_write(property, PropertyValue::Float(21.5));

    let timing = WriterTiming {
        debounce: Duration::from_millis(100),
        ..WriterTiming::default()
    };
    let (mut scheduler, mut rx) = scheduler(&world, timing);
    let t0 = Utc::now();

    assert_eq!(scheduler.tick(t0).await.unwrap(), TickOutcome::Written(device));
    assert_eq!(rx.drain().len(), 1);

    let retry = tick_until_write(&mut scheduler, t0, ms(10), ms(5_000))
        .await
        .unwrap();
    assert!(retry - t0 > ms(2_000), "resent too early: {}", retry - t0);
    assert!(retry - t0 <= ms(2_120), "resent too late: {}", retry - t0);

    let commands = rx.drain();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].value(), Some(&PropertyValue::Float(21.5)));
    assert_eq!(world.states.get(property).unwrap().pending, Pending::DispatchedAt(retry));
}

#[tokio::test]
async fn test_debounce_bounds_retry_with_default_timing() {
    let world = World::new();
    let device = world.device("valve");
    let property = world.dynamic(device);
    world.states.request_write(property, PropertyValue::Int(3));

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let t0 = Utc::now();
    scheduler.tick(t0).await.unwrap();
    rx.drain();

    // Stale after 2000ms, but the property is only looked at again once
    // the 2500ms debounce window has passed.
    let retry = tick_until_write(&mut scheduler, t0, ms(10), ms(10_000))
        .await
        .unwrap();
    assert!(retry - t0 >= ms(2_500));
    assert!(retry - t0 <= ms(2_520));
    assert_eq!(
        world.states.get(property).unwrap().expected_value,
        Some(PropertyValue::Int(3))
    );
}

#[tokio::test]
async fn test_attempts_are_spaced_by_debounce() {
    let world = World::new();
    let device = world.device("lamp");
    let property = world.dynamic(device);

    let (mut scheduler, _rx) = scheduler(&world, WriterTiming::default());
    let t0 = Utc::now();

    assert!(!scheduler.try_write_device(device, t0).await.unwrap());
    assert_eq!(scheduler.last_attempt(property), Some(t0));

    world.states.request_write(property, PropertyValue::Bool(true));
    assert!(!scheduler.try_write_device(device, t0 + ms(2_499)).await.unwrap());
    assert_eq!(scheduler.last_attempt(property), Some(t0));

    assert!(scheduler.try_write_device(device, t0 + ms(2_500)).await.unwrap());
    assert_eq!(scheduler.last_attempt(property), Some(t0 + ms(2_500)));
}

// ── Fairness ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_pass_writes_every_device_once() {
    let world = World::new();
    let devices: Vec<_> = (0..10)
        .map(|i| {
            let device = world.device(&format!("device-{i}"));
            let property = world.dynamic(device);
            world.states.request_write(property, PropertyValue::Int(i));
            device
        })
        .collect();

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let t0 = Utc::now();

    for (step, device) in (0_i64..).zip(&devices) {
        let outcome = scheduler.tick(t0 + ms(10 * step)).await.unwrap();
        assert_eq!(outcome, TickOutcome::Written(*device));
        assert_eq!(rx.drain().len(), 1, "exactly one command per tick");
    }
    assert_eq!(scheduler.processed_devices().len(), 10);

    assert_eq!(scheduler.tick(t0 + ms(100)).await.unwrap(), TickOutcome::PassCompleted);
    assert!(scheduler.processed_devices().is_empty());
    assert!(rx.try_next().is_none());
}

#[tokio::test]
async fn test_busy_device_does_not_starve_others() {
    let world = World::new();
    let busy = world.device("busy");
    let first = world.dynamic(busy);
    let second = world.dynamic(busy);
    let quiet = world.device("quiet");
    let lone = world.dynamic(quiet);
    for property in [first, second, lone] {
        world.states.request_write(property, PropertyValue::Int(1));
    }

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let t0 = Utc::now();

    assert_eq!(scheduler.tick(t0).await.unwrap(), TickOutcome::Written(busy));
    assert_eq!(scheduler.tick(t0 + ms(10)).await.unwrap(), TickOutcome::Written(quiet));
    assert_eq!(scheduler.tick(t0 + ms(20)).await.unwrap(), TickOutcome::PassCompleted);
    assert_eq!(scheduler.tick(t0 + ms(30)).await.unwrap(), TickOutcome::Written(busy));

    let written: Vec<_> = rx.drain().iter().map(hublink_core::WriteCommand::property).collect();
    assert_eq!(written, vec![first, lone, second]);
}

#[tokio::test]
async fn test_tick_skips_devices_without_work() {
    let world = World::new();
    let idle = world.device("idle");
    world.dynamic(idle);
    let active = world.device("active");
    let property = world.dynamic(active);
    world.states.request_write(property, PropertyValue::Int(9));

    let (mut scheduler, mut rx) = scheduler(&world, WriterTiming::default());
    let t0 = Utc::now();

    assert_eq!(scheduler.tick(t0).await.unwrap(), TickOutcome::Written(active));
    assert!(scheduler.processed_devices().contains(&idle));
    assert_eq!(rx.drain().len(), 1);

    assert_eq!(scheduler.tick(t0 + ms(10)).await.unwrap(), TickOutcome::PassCompleted);
    assert_eq!(scheduler.tick(t0 + ms(20)).await.unwrap(), TickOutcome::Idle);
}

// ── Failures ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_state_read_failure_skips_only_that_property() {
    let world = World::new();
    let device = world.device("sensor-hub");
    let broken = world.dynamic(device);
    let healthy = world.dynamic(device);

    let inner = MemoryStateStore::new();
    inner.request_write(broken, PropertyValue::Int(1));
    inner.request_write(healthy, PropertyValue::Int(2));
    let states = Arc::new(FailingReads { inner, broken });

    let (queue, mut rx) = write_queue();
    let core = Reconciler::new(world.connector, world.repo.clone(), states.clone());
    let mut scheduler = Scheduler::new(core, world.index(), queue, WriterTiming::default());

    assert!(scheduler.try_write_device(device, Utc::now()).await.unwrap());
    let commands = rx.drain();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].property(), healthy);
    assert!(states.inner.get(broken).unwrap().pending.is_requested());
}
