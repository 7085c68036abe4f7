/// Integration tests for the history accumulator and its disk format
///
/// Tests verify:
/// 1. save then load keeps exactly the buckets still inside the horizon
/// 2. Merging the same batch in any order gives the same buffer
/// 3. Gaps are filled forward and leading gaps hold the NO_DATA sentinel
/// 4. A history-backed retriever persists accepted merges and reseeds
///
/// Run with: cargo test --test history_accumulator

use hamwx_service::cache::{BackoffPolicy, Retriever, SampleAdapter};
use hamwx_service::history::{persist, HistoryAdapter, HistoryBuffer, HistoryConfig, MergePolicy};
use hamwx_service::model::{FetchError, Sample, NO_DATA};
use hamwx_service::transport::KeepAlive;

use chrono::{DateTime, Duration, TimeZone, Utc};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 20, 0, 0, 0).unwrap()
}

fn config(bucket_count: usize, bucket_secs: i64, policy: MergePolicy, fraction: f64) -> HistoryConfig {
    HistoryConfig {
        bucket_count,
        bucket_secs,
        merge_policy: policy,
        min_valid_fraction: fraction,
        require_recent_secs: None,
    }
}

fn sample(at: DateTime<Utc>, value: f64) -> Sample {
    Sample::new(at, value)
}

// ---------------------------------------------------------------------------
// Persistence round trip
// ---------------------------------------------------------------------------

#[test]
fn test_save_load_round_trip_respects_horizon() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("day-history.txt");

    let day = config(24, 3600, MergePolicy::Latest, 0.0);
    let mut buffer = HistoryBuffer::new(day.clone());
    let seed = [
        sample(t0(), 5.0),
        sample(t0() + Duration::seconds(3600), 7.0),
    ];
    assert!(buffer.merge(t0() + Duration::seconds(3600), &seed));
    assert_eq!(persist::save(&buffer, &path).unwrap(), 2);

    let mut reloaded = HistoryBuffer::new(day.clone());
    let kept = persist::load(&mut reloaded, &path, t0() + Duration::seconds(3600)).unwrap();
    assert_eq!(kept, 2);
    assert!(reloaded.data_ok());
    assert_eq!(reloaded.observations(), seed.to_vec());

    let mut expired = HistoryBuffer::new(day);
    let kept = persist::load(&mut expired, &path, t0() + Duration::seconds(90_000)).unwrap();
    assert_eq!(kept, 0);
    assert!(!expired.data_ok());
    assert!(expired.observations().is_empty());
}

#[test]
fn test_history_file_is_plain_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("h.txt");

    let mut buffer = HistoryBuffer::new(config(4, 600, MergePolicy::Max, 0.0));
    buffer.merge(t0(), &[sample(t0() - Duration::seconds(60), 2.5)]);
    persist::save(&buffer, &path).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, format!("{} 2.5\n", (t0() - Duration::seconds(60)).timestamp()));
}

#[test]
fn test_load_skips_garbage_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("h.txt");
    let ts = t0().timestamp();
    std::fs::write(
        &path,
        format!("{} 1.0\n\nnot a line\n{} 2.0 extra\n{} 3.0\n", ts - 7200, ts, ts - 60),
    )
    .unwrap();

    let mut buffer = HistoryBuffer::new(config(24, 3600, MergePolicy::Latest, 0.0));
    let kept = persist::load(&mut buffer, &path, t0()).unwrap();
    assert_eq!(kept, 2);
    assert_eq!(buffer.latest().unwrap().value, 3.0);
}

// ---------------------------------------------------------------------------
// Merge determinism
// ---------------------------------------------------------------------------

#[test]
fn test_merge_is_order_independent_for_max_and_latest() {
    let now = t0() + Duration::seconds(6 * 3600);
    let raw = vec![
        sample(now - Duration::seconds(100), 3.0),
        sample(now - Duration::seconds(3000), 9.0),
        sample(now - Duration::seconds(200), 4.0),
        sample(now - Duration::seconds(7300), 1.0),
        sample(now - Duration::seconds(3500), 2.0),
        sample(now - Duration::seconds(150), 4.0),
        sample(now - Duration::seconds(7100), 6.0),
    ];

    for policy in [MergePolicy::Max, MergePolicy::Latest] {
        let mut forward = HistoryBuffer::new(config(6, 3600, policy, 0.0));
        let mut reversed = HistoryBuffer::new(config(6, 3600, policy, 0.0));
        let mut shuffled = HistoryBuffer::new(config(6, 3600, policy, 0.0));

        let mut rev = raw.clone();
        rev.reverse();
        let mut shuf = raw.clone();
        shuf.rotate_left(3);

        assert!(forward.merge(now, &raw));
        assert!(reversed.merge(now, &rev));
        assert!(shuffled.merge(now, &shuf));

        assert_eq!(forward, reversed, "{:?}", policy);
        assert_eq!(forward, shuffled, "{:?}", policy);

        // merging the same batch again changes nothing
        let before = forward.clone();
        assert!(forward.merge(now, &raw));
        assert_eq!(forward, before, "{:?}", policy);
    }
}

#[test]
fn test_max_policy_keeps_strongest_in_bucket() {
    let now = t0();
    let mut buffer = HistoryBuffer::new(config(3, 600, MergePolicy::Max, 0.0));
    buffer.merge(
        now,
        &[
            sample(now - Duration::seconds(10), -6.0),
            sample(now - Duration::seconds(400), -4.5),
            sample(now - Duration::seconds(300), -5.0),
        ],
    );
    assert_eq!(buffer.values_at(now)[2], -4.5);
}

// ---------------------------------------------------------------------------
// Gap filling
// ---------------------------------------------------------------------------

#[test]
fn test_gap_fill_capacity_ten() {
    let now = t0();
    let width = 60;
    let at_position = |pos: i64| now - Duration::seconds((9 - pos) * width + 1);

    let mut buffer = HistoryBuffer::new(config(10, width, MergePolicy::Latest, 0.5));
    let populated = [0, 1, 2, 7, 8, 9];
    let samples: Vec<Sample> = populated
        .iter()
        .map(|&p| sample(at_position(p), 10.0 + p as f64))
        .collect();
    assert!(buffer.merge(now, &samples));

    let series = buffer.series_at(now);
    assert_eq!(series.len(), 10);
    for pos in 3..=6 {
        assert_eq!(series[pos].value, 12.0, "bucket {} should carry bucket 2", pos);
        assert!(!series[pos].valid);
    }
    for &pos in &populated {
        assert!(series[pos as usize].valid);
    }
    assert_eq!(series[0].value, 10.0);
    assert_eq!(series[9].age_hours, 0.0);
}

#[test]
fn test_leading_gap_holds_sentinel() {
    let now = t0();
    let mut buffer = HistoryBuffer::new(config(10, 60, MergePolicy::Latest, 0.0));
    buffer.merge(now, &[sample(now - Duration::seconds(30), 1.0)]);

    let values = buffer.values_at(now);
    assert!(values[..9].iter().all(|&v| v == NO_DATA));
    assert_eq!(values[9], 1.0);
}

#[test]
fn test_sparse_batch_is_rejected_without_side_effects() {
    let now = t0();
    let mut buffer = HistoryBuffer::new(config(10, 60, MergePolicy::Latest, 0.5));
    let dense: Vec<Sample> = (0..10)
        .map(|i| sample(now - Duration::seconds(i * 60 + 1), i as f64))
        .collect();
    assert!(buffer.merge(now, &dense));
    let before = buffer.clone();

    let later = now + Duration::seconds(60);
    let sparse = [sample(later - Duration::seconds(5), 99.0)];
    assert_eq!(
        buffer.try_merge(later, &sparse),
        Err(FetchError::InsufficientData { have: 1, need: 5 })
    );
    assert_eq!(buffer, before);
}

#[test]
fn test_append_rebases_and_evicts() {
    let now = t0();
    let mut buffer = HistoryBuffer::new(config(3, 60, MergePolicy::Latest, 0.0));
    buffer.append(now, sample(now, 1.0));
    buffer.append(now + Duration::seconds(60), sample(now + Duration::seconds(60), 2.0));
    buffer.append(now + Duration::seconds(120), sample(now + Duration::seconds(120), 3.0));
    assert_eq!(buffer.observed_count(), 3);

    buffer.append(now + Duration::seconds(180), sample(now + Duration::seconds(180), 4.0));
    let values: Vec<f64> = buffer.observations().iter().map(|s| s.value).collect();
    assert_eq!(values, vec![2.0, 3.0, 4.0]);
}

// ---------------------------------------------------------------------------
// History-backed retriever
// ---------------------------------------------------------------------------

struct FixedBatch(Vec<Sample>);

impl SampleAdapter for FixedBatch {
    fn label(&self) -> &str {
        "FIXED"
    }

    fn fetch_samples(
        &mut self,
        _now: DateTime<Utc>,
        _hook: &mut dyn KeepAlive,
    ) -> Result<Vec<Sample>, FetchError> {
        Ok(self.0.clone())
    }
}

#[test]
fn test_history_retriever_persists_and_reseeds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fixed-history.txt");
    let day = config(24, 3600, MergePolicy::Latest, 0.1);
    let now = t0() + Duration::seconds(12 * 3600);
    let batch: Vec<Sample> = (0..6)
        .map(|h| sample(now - Duration::seconds(h * 3600 + 5), 10.0 - h as f64))
        .collect();

    let adapter = HistoryAdapter::new(FixedBatch(batch), HistoryBuffer::new(day.clone()))
        .persist_to(&path);
    let mut retriever = Retriever::new(adapter, BackoffPolicy::fixed(3600, 120));
    let reading = retriever.get_value_at(now, false).unwrap();
    assert!(reading.ok);
    assert_eq!(reading.value.as_ref().unwrap().latest, 10.0);
    assert!(path.exists());

    // a fresh process seeds from the saved file before its first fetch
    let mut restarted = HistoryAdapter::new(FixedBatch(Vec::new()), HistoryBuffer::new(day))
        .persist_to(&path);
    let later = now + Duration::seconds(1800);
    let snapshot = restarted.load_at(later).unwrap();
    assert_eq!(snapshot.latest, 10.0);
    assert_eq!(snapshot.points.len(), 24);
}
