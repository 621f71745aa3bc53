use std::{sync::Arc, time::Duration};

use futures::stream;
use influxdb_reactive::{
    BatchOptions, BoxError, Client, ClientOptions, ConsistencyLevel, Error, Event, EventKind,
    Measurement, OverflowStrategy, Point, Precision, ServerError, WriteConcurrency, WriteOptions,
    scheduler::{ImmediateScheduler, ManualScheduler, Schedulers, TokioScheduler},
};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;

use crate::{
    MockTransport, client_options, drain_events, kinds, mock_client, retryable, settle, wait_for,
};

fn batch_options(batch_size: usize) -> BatchOptions {
    BatchOptions::default().batch_size(batch_size).unwrap()
}

fn options(database: &str) -> WriteOptions {
    WriteOptions::new(database).unwrap()
}

#[test_log::test(tokio::test)]
async fn flush_when_batch_is_full() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(3), &transport, &scheduler);

    client.write_record("cpu value=1i 1").unwrap();
    client.write_record("cpu value=2i 2").unwrap();
    settle().await;
    assert_eq!(transport.n_calls(), 0);

    client.write_record("cpu value=3i 3").unwrap();
    wait_for(|| transport.n_calls() == 1).await;

    let calls = transport.calls();
    assert_eq!(
        calls[0].lines(),
        ["cpu value=1i 1", "cpu value=2i 2", "cpu value=3i 3"]
    );
    assert_eq!(calls[0].options, client_options().default_write_options().unwrap());
}

#[test_log::test(tokio::test)]
async fn flush_when_interval_elapses() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let batch_options = batch_options(100)
        .flush_interval(Duration::from_secs(1))
        .unwrap();
    let client = mock_client(batch_options, &transport, &scheduler);

    client.write_record("cpu value=1i 1").unwrap();
    client.write_record("cpu value=2i 2").unwrap();
    wait_for(|| scheduler.pending() == 1).await;

    scheduler.advance(Duration::from_millis(999));
    settle().await;
    assert_eq!(transport.n_calls(), 0);

    scheduler.advance(Duration::from_millis(1));
    wait_for(|| transport.n_calls() == 1).await;
    assert_eq!(transport.calls()[0].lines().len(), 2);

    // an empty window does not produce a write
    scheduler.advance(Duration::from_secs(10));
    settle().await;
    assert_eq!(transport.n_calls(), 1);

    // the next point opens a new window
    client.write_record("cpu value=3i 3").unwrap();
    wait_for(|| scheduler.pending() == 1).await;
    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 2).await;
    assert_eq!(transport.calls()[1].lines(), ["cpu value=3i 3"]);
}

#[test_log::test(tokio::test)]
async fn jitter_delays_the_flush() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let batch_options = batch_options(1).jitter_interval(Duration::from_secs(1));
    let client = mock_client(batch_options, &transport, &scheduler);

    client.write_record("cpu value=1i 1").unwrap();
    wait_for(|| scheduler.pending() == 1).await;
    settle().await;
    assert_eq!(transport.n_calls(), 0);

    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 1).await;
}

#[test_log::test(tokio::test)]
async fn every_batch_gets_its_own_jitter_delay() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let batch_options = batch_options(1).jitter_interval(Duration::from_secs(1));
    let client = mock_client(batch_options, &transport, &scheduler);

    client.write_record("cpu value=1i 1").unwrap();
    client.write_record("cpu value=2i 2").unwrap();
    wait_for(|| scheduler.pending() == 2).await;
    settle().await;
    assert_eq!(transport.n_calls(), 0);

    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 2).await;
    let bodies: Vec<_> = transport.calls().into_iter().map(|c| c.body).collect();
    assert_eq!(bodies, ["cpu value=1i 1", "cpu value=2i 2"]);
    assert_eq!(scheduler.pending(), 0);
}

#[test_log::test(tokio::test)]
async fn retry_waits_for_retry_interval_plus_jitter() {
    let transport = MockTransport::new();
    transport.fail_next("my_db", [retryable()]);
    let retry = ManualScheduler::new();
    let schedulers = Schedulers {
        batch: Arc::new(TokioScheduler),
        jitter: Arc::new(ImmediateScheduler),
        retry: Arc::clone(&retry) as _,
    };
    let batch_options = batch_options(1)
        .retry_interval(Duration::from_secs(1))
        .unwrap()
        .jitter_interval(Duration::from_secs(1));
    let client = Client::builder(client_options())
        .batch_options(batch_options)
        .transport(Arc::clone(&transport) as _)
        .schedulers(schedulers)
        .build();

    client.write_record("cpu value=1i 1").unwrap();
    wait_for(|| transport.n_calls() == 1).await;
    wait_for(|| retry.pending() == 1).await;

    // the retry is due somewhere in [1s, 2s)
    retry.advance(Duration::from_millis(999));
    settle().await;
    assert_eq!(transport.n_calls(), 1);
    assert_eq!(retry.pending(), 1);

    retry.advance(Duration::from_millis(1_001));
    wait_for(|| transport.n_calls() == 2).await;
    let calls = transport.calls();
    assert_eq!(calls[0], calls[1]);
}

#[test_log::test(tokio::test)]
async fn close_flushes_pending_points() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(100), &transport, &scheduler);

    client
        .write_records((0..5).map(|i| format!("cpu value={i}i {i}")))
        .unwrap();
    assert!(!client.is_closed());
    client.close().await;

    assert!(client.is_closed());
    let calls = transport.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].lines().len(), 5);

    assert!(matches!(
        client.write_record("cpu value=6i 6"),
        Err(Error::Closed)
    ));
}

#[test_log::test(tokio::test)]
async fn point_is_written_as_line_protocol() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(1), &transport, &scheduler);

    let point = Point::builder("h2o_feet")
        .tag("location", "coyote_creek")
        .field("water_level", 2.927)
        .timestamp(1_440_046_800, Precision::Nanosecond)
        .build()
        .unwrap();
    client.write_point(point).unwrap();

    wait_for(|| transport.n_calls() == 1).await;
    assert_eq!(
        transport.calls()[0].body,
        "h2o_feet,location=coyote_creek water_level=2.927 1440046800"
    );
}

#[derive(Debug)]
struct H2oFeet {
    location: &'static str,
    level_description: &'static str,
    water_level: f64,
    time_seconds: i64,
}

impl Measurement for H2oFeet {
    fn to_point(&self, _precision: Precision) -> Result<Point, BoxError> {
        Ok(Point::builder("h2o_feet")
            .tag("location", self.location)
            .field("level description", self.level_description)
            .field("water_level", self.water_level)
            .timestamp(self.time_seconds, Precision::Second)
            .build()?)
    }
}

#[derive(Debug)]
struct Unmappable;

impl Measurement for Unmappable {
    fn to_point(&self, _precision: Precision) -> Result<Point, BoxError> {
        Err("measurement has no fields".into())
    }
}

#[test_log::test(tokio::test)]
async fn measurement_is_written_in_write_precision() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(1), &transport, &scheduler);

    let options = options("my_db").precision(Precision::Microsecond);
    client
        .write_measurement_with(
            &options,
            H2oFeet {
                location: "coyote_creek",
                level_description: "below 3 feet",
                water_level: 2.927,
                time_seconds: 1_440_046_801,
            },
        )
        .unwrap();

    wait_for(|| transport.n_calls() == 1).await;
    let calls = transport.calls();
    let call = &calls[0];
    assert_eq!(call.options.time_precision(), Precision::Microsecond);
    assert_eq!(
        call.body,
        r#"h2o_feet,location=coyote_creek level\ description="below 3 feet",water_level=2.927 1440046801000000"#
    );
}

#[test_log::test(tokio::test)]
async fn unserializable_points_are_reported_and_left_out() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(3), &transport, &scheduler);
    let mut events = client.events();

    client.write_record("cpu value=1i 1").unwrap();
    client.write_measurement(Unmappable).unwrap();
    client.write_record("cpu value=3i 3").unwrap();

    wait_for(|| transport.n_calls() == 1).await;
    assert_eq!(transport.calls()[0].lines(), ["cpu value=1i 1", "cpu value=3i 3"]);

    settle().await;
    let received = drain_events(&mut events);
    assert_eq!(kinds(&received), [EventKind::Unhandled, EventKind::WriteSuccess]);
    let Event::Unhandled { error, points } = &*received[0] else {
        unreachable!()
    };
    assert!(matches!(error, Error::Serialization { .. }), "{error:?}");
    assert_eq!(points.len(), 1);
    assert_eq!(received[1].points().len(), 2);
}

#[test_log::test(tokio::test)]
async fn batch_without_serializable_points_is_not_sent() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(2), &transport, &scheduler);
    let mut events = client.listen_events(EventKind::Unhandled);

    client
        .write_measurements([Unmappable, Unmappable])
        .unwrap();
    let mut unhandled = 0;
    wait_for(|| {
        unhandled += drain_events(&mut events).len();
        unhandled == 2
    })
    .await;
    client.close().await;
    assert_eq!(transport.n_calls(), 0);
}

#[test_log::test(tokio::test)]
async fn retry_worth_error_is_retried_with_the_same_points() {
    let transport = MockTransport::new();
    transport.fail_next("my_db", [retryable()]);
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(3), &transport, &scheduler);
    let mut events = client.events();

    client
        .write_records(["cpu value=1i 1", "cpu value=2i 2", "cpu value=3i 3"])
        .unwrap();

    wait_for(|| transport.n_calls() == 1).await;
    wait_for(|| scheduler.pending() == 1).await;
    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 2).await;

    let calls = transport.calls();
    assert_eq!(calls[0], calls[1]);

    settle().await;
    let received = drain_events(&mut events);
    assert_eq!(kinds(&received), [EventKind::WriteError, EventKind::WriteSuccess]);
    let Event::WriteError { error, .. } = &*received[0] else {
        unreachable!()
    };
    assert!(error.is_retry_worth());

    let lines = |event: &Event| -> Vec<String> {
        event
            .points()
            .iter()
            .map(|p| p.line_protocol().unwrap())
            .collect()
    };
    assert_eq!(lines(&received[0]), lines(&received[1]));
    assert_eq!(lines(&received[1]).len(), 3);
}

#[test_log::test(tokio::test)]
async fn retries_keep_the_order_of_batches() {
    let transport = MockTransport::new();
    transport.fail_next("my_db", [retryable(), retryable()]);
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(2), &transport, &scheduler);

    client.write_records(["m v=1i 1", "m v=2i 2"]).unwrap();
    wait_for(|| transport.n_calls() == 1).await;
    client.write_records(["m v=3i 3", "m v=4i 4"]).unwrap();

    wait_for(|| scheduler.pending() == 1).await;
    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 2).await;
    wait_for(|| scheduler.pending() == 1).await;
    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 4).await;

    let bodies: Vec<_> = transport.calls().into_iter().map(|c| c.body).collect();
    assert_eq!(
        bodies,
        [
            "m v=1i 1\nm v=2i 2",
            "m v=1i 1\nm v=2i 2",
            "m v=1i 1\nm v=2i 2",
            "m v=3i 3\nm v=4i 4",
        ]
    );
}

#[test_log::test(tokio::test)]
async fn partial_write_is_not_retried() {
    let transport = MockTransport::new();
    transport.fail_next(
        "my_db",
        [ServerError::new(
            Some(StatusCode::BAD_REQUEST),
            "partial write: field type conflict: input field \"value\" on measurement \"cpu\" is type float, already exists as type integer dropped=1",
        )],
    );
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(2), &transport, &scheduler);
    let mut events = client.events();

    client.write_records(["cpu value=1i 1", "cpu value=2.0 2"]).unwrap();
    wait_for(|| transport.n_calls() == 1).await;
    settle().await;
    assert_eq!(scheduler.pending(), 0);
    scheduler.advance(Duration::from_secs(60));
    settle().await;

    assert_eq!(transport.n_calls(), 1);
    let received = drain_events(&mut events);
    assert_eq!(kinds(&received), [EventKind::WritePartial]);
    assert_eq!(received[0].points().len(), 2);
}

#[test_log::test(tokio::test)]
async fn fatal_error_is_not_retried() {
    let transport = MockTransport::new();
    transport.fail_next(
        "not_exist_database",
        [ServerError::new(
            Some(StatusCode::NOT_FOUND),
            "database not found: \"not_exist_database\"",
        )],
    );
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(1), &transport, &scheduler);
    let mut events = client.events();

    client
        .write_record_with(&options("not_exist_database"), "cpu value=1i 1")
        .unwrap();
    wait_for(|| transport.n_calls() == 1).await;
    settle().await;
    assert_eq!(scheduler.pending(), 0);

    let received = drain_events(&mut events);
    assert_eq!(kinds(&received), [EventKind::WriteError]);
    let Event::WriteError { error, options, .. } = &*received[0] else {
        unreachable!()
    };
    assert!(!error.is_retry_worth());
    assert_eq!(options.database_name(), Some("not_exist_database"));
}

#[test_log::test(tokio::test)]
async fn destinations_are_written_separately() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(3), &transport, &scheduler);

    let quorum = options("db_b").consistency_level(ConsistencyLevel::Quorum);
    client.write_record_with(&options("db_a"), "m v=1i 1").unwrap();
    client.write_record_with(&quorum, "m v=2i 2").unwrap();
    client.write_record_with(&options("db_a"), "m v=3i 3").unwrap();

    wait_for(|| transport.n_calls() == 2).await;
    let calls = transport.calls();
    assert_eq!(calls[0].options, options("db_a"));
    assert_eq!(calls[0].lines(), ["m v=1i 1", "m v=3i 3"]);
    assert_eq!(calls[1].options, quorum);
    assert_eq!(calls[1].lines(), ["m v=2i 2"]);
}

#[test_log::test(tokio::test)]
async fn concurrent_destinations_do_not_wait_for_each_other() {
    let transport = MockTransport::new();
    transport.fail_next("slow", [retryable()]);
    let scheduler = ManualScheduler::new();
    let batch_options = batch_options(1).write_concurrency(WriteConcurrency::Concurrent);
    let client = mock_client(batch_options, &transport, &scheduler);

    client.write_record_with(&options("slow"), "m v=1i 1").unwrap();
    wait_for(|| scheduler.pending() == 1).await;

    // the retry of "slow" is pending while "fast" is written
    client.write_record_with(&options("fast"), "m v=2i 2").unwrap();
    client.write_record_with(&options("fast"), "m v=3i 3").unwrap();
    wait_for(|| transport.n_calls() == 3).await;

    scheduler.advance(Duration::from_secs(1));
    wait_for(|| transport.n_calls() == 4).await;

    let fast: Vec<_> = transport
        .calls()
        .into_iter()
        .filter(|c| c.options == options("fast"))
        .map(|c| c.body)
        .collect();
    assert_eq!(fast, ["m v=2i 2", "m v=3i 3"]);
    assert_eq!(transport.calls()[3].options, options("slow"));
}

#[test_log::test(tokio::test)]
async fn pending_retry_is_abandoned_on_close() {
    let transport = MockTransport::new();
    transport.fail_next("my_db", [retryable()]);
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(1), &transport, &scheduler);

    client.write_record("m v=1i 1").unwrap();
    wait_for(|| scheduler.pending() == 1).await;

    tokio::time::timeout(Duration::from_secs(5), client.close())
        .await
        .expect("close does not wait for retries");
    assert!(client.is_closed());
    assert_eq!(transport.n_calls(), 1);
}

#[test_log::test(tokio::test)]
async fn overflow_is_reported_as_backpressure() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let batch_options = BatchOptions::default().buffer_limit(0);
    let client = mock_client(batch_options, &transport, &scheduler);
    let mut backpressure = client.listen_events(EventKind::Backpressure);

    for i in 0..20_000 {
        client.write_record(format!("m v={i}i {i}")).unwrap();
    }
    client.close().await;

    let written: usize = transport.calls().iter().map(|c| c.lines().len()).sum();
    let events = drain_events(&mut backpressure);
    let dropped: usize = events
        .iter()
        .map(|e| match **e {
            Event::Backpressure { dropped } => dropped,
            _ => 0,
        })
        .sum();

    assert!(!events.is_empty());
    assert!(written >= 1);
    assert_eq!(dropped + written, 20_000);
}

#[test_log::test(tokio::test)]
async fn drop_latest_keeps_the_first_points() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let batch_options = BatchOptions::default()
        .buffer_limit(2)
        .overflow_strategy(OverflowStrategy::DropLatest);
    let client = mock_client(batch_options, &transport, &scheduler);

    client
        .write_records(["m v=1i 1", "m v=2i 2", "m v=3i 3"])
        .unwrap();
    client.close().await;

    assert_eq!(transport.calls()[0].lines(), ["m v=1i 1", "m v=2i 2"]);
}

#[test_log::test(tokio::test)]
async fn error_strategy_fails_the_producer() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let batch_options = BatchOptions::default()
        .buffer_limit(1)
        .overflow_strategy(OverflowStrategy::Error);
    let client = mock_client(batch_options, &transport, &scheduler);

    client.write_record("m v=1i 1").unwrap();
    assert!(matches!(
        client.write_record("m v=2i 2"),
        Err(Error::BufferOverflow { limit: 1 })
    ));
}

#[test_log::test(tokio::test)]
async fn udp_writes_are_fire_and_forget() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(2), &transport, &scheduler);
    let mut events = client.events();

    let udp = WriteOptions::udp(8089);
    client
        .write_records_with(&udp, ["m v=1i 1", "m v=2i 2"])
        .unwrap();
    wait_for(|| transport.udp_calls().len() == 1).await;

    assert_eq!(transport.udp_calls()[0], (8089, "m v=1i 1\nm v=2i 2".to_string()));
    assert_eq!(transport.n_calls(), 0);
    settle().await;
    let received = drain_events(&mut events);
    assert_eq!(kinds(&received), [EventKind::WriteUdp]);
    assert_eq!(received[0].points().len(), 2);
}

#[test_log::test(tokio::test)]
async fn default_write_options_are_required() {
    let transport = MockTransport::new();
    let client = Client::builder(ClientOptions::new("http://localhost:8086").unwrap())
        .transport(Arc::clone(&transport) as _)
        .build();

    assert!(matches!(
        client.write_record("m v=1i 1"),
        Err(Error::MissingWriteOptions)
    ));
    assert!(matches!(
        client.write_measurement(Unmappable),
        Err(Error::MissingWriteOptions)
    ));
    client.write_record_with(&options("db"), "m v=1i 1").unwrap();
    client.close().await;
    assert_eq!(transport.n_calls(), 1);
}

#[test_log::test(tokio::test)]
async fn stream_of_records_is_written() {
    let transport = MockTransport::new();
    let scheduler = ManualScheduler::new();
    let client = mock_client(batch_options(2), &transport, &scheduler);

    client
        .write_stream(stream::iter(["m v=1i 1", "m v=2i 2", "m v=3i 3", "m v=4i 4"]))
        .await
        .unwrap();

    wait_for(|| transport.n_calls() == 2).await;
    assert_eq!(transport.calls()[1].lines(), ["m v=3i 3", "m v=4i 4"]);
}

#[test_log::test(tokio::test)]
async fn connection_failure_is_unhandled_and_not_retried() {
    let scheduler = ManualScheduler::new();
    let options = ClientOptions::new("http://127.0.0.1:1")
        .unwrap()
        .database("my_db")
        .unwrap();
    let client = Client::builder(options)
        .batch_options(batch_options(1))
        .schedulers(Schedulers::all(
            Arc::clone(&scheduler) as _
        ))
        .build();
    let mut events = client.events();

    client.write_record("m v=1i 1").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap();

    let Event::Unhandled { error, points } = &*event else {
        panic!("unexpected event {event:?}");
    };
    assert!(matches!(error, Error::RequestSend { .. }), "{error:?}");
    assert_eq!(event.points().len(), 1);
    assert_eq!(points[0].line_protocol().unwrap(), "m v=1i 1");
    assert_eq!(scheduler.pending(), 0);
}
