use std::{sync::Arc, time::Duration};

use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use iori_dash::{
    ClientOptions, DashError, MpdClient, SegmentAdvance, SegmentCursor, UtcTimingMethod,
};
use url::Url;

use crate::{init_tracing, mock::MockDownloader, AssertWrapper};

const MANIFEST_URL: &str = "https://live.example.com/channel/manifest.mpd";

const ADAPTATION_SET: &str = r#"<AdaptationSet id="1" contentType="video" mimeType="video/mp4">
      <SegmentTemplate media="$Number$.m4s" initialization="init.mp4" timescale="1" duration="2" startNumber="1"/>
      <Representation id="v" bandwidth="1000000"/>
    </AdaptationSet>"#;

fn secs(secs: u64) -> Duration {
    Duration::from_secs(secs)
}

/// A live manifest whose availability started `elapsed` seconds ago.
fn live_manifest(elapsed: i64, mpd_attributes: &str, periods: &str, timings: &str) -> String {
    let availability_start_time = (Utc::now() - TimeDelta::seconds(elapsed))
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" type="dynamic" availabilityStartTime="{availability_start_time}"
     minimumUpdatePeriod="PT2S" timeShiftBufferDepth="PT30S" minBufferTime="PT2S"
     profiles="urn:mpeg:dash:profile:isoff-live:2011" {mpd_attributes}>
  {periods}
  {timings}
</MPD>"#
    )
}

fn single_period(elapsed: i64) -> String {
    live_manifest(
        elapsed,
        r#"maxSegmentDuration="PT2S""#,
        &format!(r#"<Period id="live" start="PT0S"><BaseURL>live/</BaseURL>{ADAPTATION_SET}</Period>"#),
        "",
    )
}

fn live_client(manifest: &str, options: ClientOptions) -> MpdClient<Arc<MockDownloader>> {
    init_tracing();
    let client = MpdClient::new(Arc::new(MockDownloader::new()), options);
    client.set_mpd_uri(Url::parse(MANIFEST_URL).unwrap());
    client.parse(manifest.as_bytes()).assert_success();
    client
}

#[test]
fn test_segment_not_yet_available() -> anyhow::Result<()> {
    let client = live_client(&single_period(11), ClientOptions::default());
    assert!(client.is_live()?);
    let availability_start_time = client.availability_start_time()?.assert_success();

    let stream = client.setup_streaming(0)?;
    assert_eq!(client.stream_seek(stream, true, secs(10))?, secs(10));

    // the segment covering 10s..12s is published at AST + 12s
    let expected = availability_start_time + TimeDelta::seconds(12);
    match client.get_next_fragment(stream) {
        Err(DashError::SegmentNotAvailable(at)) => assert_eq!(at, expected),
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        client.get_next_segment_availability_start_time(stream)?,
        Some(expected)
    );

    assert_eq!(client.advance_segment(stream, false)?, SegmentAdvance::Advanced);
    let fragment = client.get_next_fragment(stream)?;
    assert_eq!(fragment.number, 5);
    assert_eq!(
        fragment.uri.as_str(),
        "https://live.example.com/channel/live/5.m4s"
    );

    Ok(())
}

#[test]
fn test_segment_available() -> anyhow::Result<()> {
    let client = live_client(&single_period(13), ClientOptions::default());
    let stream = client.setup_streaming(0)?;
    client.stream_seek(stream, true, secs(10))?;

    let fragment = client.get_next_fragment(stream)?;
    assert_eq!(fragment.number, 6);
    assert_eq!(fragment.timestamp, secs(10));
    assert_eq!(client.get_last_fragment_timestamp_end(stream)?, secs(12));

    Ok(())
}

#[test]
fn test_open_ended_period() -> anyhow::Result<()> {
    let client = live_client(&single_period(13), ClientOptions::default());
    let periods = client.periods();
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0].duration, None);
    assert_eq!(client.media_presentation_duration()?, None);

    let stream = client.setup_streaming(0)?;
    client.seek_to_first_segment()?;
    for _ in 0..100 {
        assert_eq!(client.advance_segment(stream, true)?, SegmentAdvance::Advanced);
    }
    assert!(client.has_next_segment(stream, true)?);
    assert_eq!(client.get_next_fragment_timestamp(stream)?, secs(200));

    let presentation = client.presentation().assert_success();
    assert_eq!(presentation.minimum_update_period, Some(secs(2)));
    assert_eq!(presentation.time_shift_buffer_depth, Some(secs(30)));

    Ok(())
}

#[test]
fn test_seek_to_time() -> anyhow::Result<()> {
    let client = live_client(&single_period(13), ClientOptions::default());
    let stream = client.setup_streaming(0)?;
    let availability_start_time = client.availability_start_time()?.assert_success();

    client.seek_to_time(client.now())?;
    assert_eq!(client.get_next_fragment_timestamp(stream)?, secs(12));

    client.seek_to_time(availability_start_time + TimeDelta::seconds(9))?;
    assert_eq!(client.active_stream(stream)?.cursor, SegmentCursor::At(4));

    // before the availability start
    client.seek_to_time(availability_start_time - TimeDelta::seconds(60))?;
    assert_eq!(client.active_stream(stream)?.cursor, SegmentCursor::At(0));

    Ok(())
}

#[test]
fn test_seek_to_time_switches_period() -> anyhow::Result<()> {
    let periods = format!(
        r#"<Period id="a" start="PT0S">{ADAPTATION_SET}</Period>
  <Period id="b" start="PT10S">{ADAPTATION_SET}</Period>"#
    );
    let client = live_client(&live_manifest(13, "", &periods, ""), ClientOptions::default());
    assert_eq!(client.periods()[0].duration, Some(secs(10)));

    client.setup_streaming(0)?;
    client.seek_to_time(client.now())?;
    assert_eq!(client.period_id()?.as_deref(), Some("b"));
    assert_eq!(client.stream_count(), 1);
    // second segment of the period
    assert_eq!(client.active_stream(0)?.cursor, SegmentCursor::At(1));
    assert_eq!(client.get_next_fragment_timestamp(0)?, secs(12));

    Ok(())
}

#[test]
fn test_seek_to_time_past_last_period() -> anyhow::Result<()> {
    let periods = format!(
        r#"<Period id="a" start="PT0S">{ADAPTATION_SET}</Period>
  <Period id="b" start="PT10S" duration="PT4S">{ADAPTATION_SET}</Period>"#
    );
    let client = live_client(&live_manifest(20, "", &periods, ""), ClientOptions::default());
    let stream = client.setup_streaming(0)?;
    client.seek_to_first_segment()?;

    // 20s lies behind the end of "b"
    assert!(matches!(
        client.seek_to_time(client.now()),
        Err(DashError::SegmentOutOfRange)
    ));
    assert_eq!(client.period_index(), 0);
    assert_eq!(client.period_id()?.as_deref(), Some("a"));
    assert_eq!(client.stream_count(), 1);
    assert_eq!(client.active_stream(stream)?.cursor, SegmentCursor::At(0));

    Ok(())
}

#[test]
fn test_last_fragment_of_finite_live_period() -> anyhow::Result<()> {
    let manifest = live_manifest(
        13,
        "",
        &format!(r#"<Period id="live" start="PT0S" duration="PT20S">{ADAPTATION_SET}</Period>"#),
        "",
    );
    let client = live_client(&manifest, ClientOptions::default());
    let stream = client.setup_streaming(0)?;
    client.seek_to_first_segment()?;

    // the whole period counts, not only what is published by now
    assert_eq!(client.get_last_fragment_timestamp_end(stream)?, secs(20));
    assert!(matches!(
        client.get_next_fragment(stream),
        Ok(fragment) if fragment.timestamp == secs(0)
    ));

    Ok(())
}

#[test]
fn test_presentation_delay() -> anyhow::Result<()> {
    let options = ClientOptions {
        default_presentation_delay: "3f".to_string(),
        ..Default::default()
    };
    let client = live_client(&single_period(13), options);
    assert_eq!(client.presentation_delay()?, secs(6));
    assert_eq!(client.maximum_segment_duration()?, Some(secs(2)));

    let manifest = live_manifest(
        13,
        r#"suggestedPresentationDelay="PT8S""#,
        &format!(r#"<Period start="PT0S">{ADAPTATION_SET}</Period>"#),
        "",
    );
    let client = live_client(&manifest, ClientOptions::default());
    assert_eq!(client.presentation_delay()?, secs(8));

    Ok(())
}

fn assert_offset_near(actual: TimeDelta, expected: TimeDelta) {
    let difference = (actual - expected).num_milliseconds().abs();
    assert!(difference < 5_000, "offset {actual} too far from {expected}");
}

#[tokio::test]
async fn test_sync_clock_direct() -> anyhow::Result<()> {
    let remote_now: DateTime<Utc> = Utc::now() + TimeDelta::hours(1);
    let timing = format!(
        r#"<UTCTiming schemeIdUri="urn:mpeg:dash:utc:direct:2014" value="{}"/>"#,
        remote_now.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let manifest = live_manifest(
        13,
        "",
        &format!(r#"<Period start="PT0S">{ADAPTATION_SET}</Period>"#),
        &timing,
    );
    let client = live_client(&manifest, ClientOptions::default());

    let (method, sources) = client.utc_timing_sources()?.assert_success();
    assert_eq!(method, UtcTimingMethod::Direct);
    assert_eq!(sources.len(), 1);

    client.sync_clock().await?;
    assert_offset_near(client.now() - Utc::now(), TimeDelta::hours(1));

    Ok(())
}

#[tokio::test]
async fn test_sync_clock_falls_through_unsupported_schemes() -> anyhow::Result<()> {
    init_tracing();
    let downloader = Arc::new(MockDownloader::new());
    let remote_now = Utc::now() - TimeDelta::minutes(30);
    downloader.serve(
        "https://time.example.com/now",
        remote_now.to_rfc3339_opts(SecondsFormat::Millis, true),
    );

    let timings = r#"<UTCTiming schemeIdUri="urn:mpeg:dash:utc:http-head:2014" value="https://time.example.com/head"/>
  <UTCTiming schemeIdUri="urn:mpeg:dash:utc:http-xsdate:2014" value="https://time.example.com/now"/>"#;
    let manifest = live_manifest(
        13,
        "",
        &format!(r#"<Period start="PT0S">{ADAPTATION_SET}</Period>"#),
        timings,
    );
    let url = downloader.serve(MANIFEST_URL, manifest);
    let client = MpdClient::new(downloader.clone(), ClientOptions::default());
    client.load(url).await?;

    client.sync_clock().await?;
    assert_offset_near(client.now() - Utc::now(), TimeDelta::minutes(-30));

    Ok(())
}

#[tokio::test]
async fn test_sync_clock_without_timing() -> anyhow::Result<()> {
    let client = live_client(&single_period(13), ClientOptions::default());
    client.sync_clock().await?;
    assert_offset_near(client.now() - Utc::now(), TimeDelta::zero());

    Ok(())
}
