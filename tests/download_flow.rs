//! End-to-end download scenarios against a mock HLS origin
//!
//! Every test spins up its own wiremock server, so they run in parallel; only
//! the signal-handling test is serialized.
//!
//! # Running the tests
//!
//! ```bash
//! cargo test --test download_flow
//! ```

mod common;

use common::{
    HlsOrigin, MediaOptions, TEST_KEY, assert_merged, assert_no_leftovers,
    create_test_downloader, drain_events, encrypt_segment, event_kind, expected_output,
    master_playlist, media_playlist, segment_body,
};
use hls_dl::decrypt::derive_iv;
use hls_dl::{DownloadRequest, DownloadResult, Event, FailureReason, run_with_shutdown};
use serial_test::serial;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn fifty_segments_merge_in_order() {
    let origin = HlsOrigin::start().await;
    origin.serve_media("/vod", 50).await;
    let (downloader, temp_dir) = create_test_downloader();
    let mut events = downloader.subscribe();

    let result = downloader
        .download(DownloadRequest::new(
            origin.url("/vod/index.m3u8"),
            temp_dir.path().join("movie.mp4"),
            "movie",
        ))
        .await;

    assert_merged(&result, &expected_output(50));
    match &result {
        DownloadResult::Success { path, .. } => assert_eq!(path, &temp_dir.path().join("movie.ts")),
        DownloadResult::Failed(reason) => panic!("unexpected failure: {reason}"),
    }
    assert_no_leftovers(temp_dir.path(), "movie");

    let events = drain_events(&mut events);
    let kinds: Vec<&str> = events.iter().map(event_kind).collect();
    assert_eq!(kinds.first(), Some(&"playlist_resolved"));
    assert_eq!(kinds.last(), Some(&"complete"));
    assert!(kinds.contains(&"merging"));
    assert!(!kinds.contains(&"retry_pass"), "nothing needed a retry pass");
    assert!(matches!(
        events.first(),
        Some(Event::PlaylistResolved {
            segments: 50,
            encrypted: false,
            ..
        })
    ));
}

#[tokio::test]
async fn segment_rate_limited_twice_still_completes() {
    let origin = HlsOrigin::start().await;
    // Mounted first, so the two 403s are served before the real segment
    origin.fail("/vod/seg10.ts", 403, Some(2)).await;
    origin.serve_media("/vod", 20).await;
    let (downloader, temp_dir) = create_test_downloader();
    let mut events = downloader.subscribe();

    let result = downloader
        .download(DownloadRequest::new(
            origin.url("/vod/index.m3u8"),
            temp_dir.path().join("clip.ts"),
            "clip",
        ))
        .await;

    assert_merged(&result, &expected_output(20));
    let kinds: Vec<&str> = drain_events(&mut events).iter().map(event_kind).collect();
    assert!(
        !kinds.contains(&"retry_pass"),
        "the third in-pass attempt recovers the segment"
    );
}

#[tokio::test]
async fn encrypted_segments_use_media_sequence_iv() {
    let origin = HlsOrigin::start().await;
    let options = MediaOptions {
        media_sequence: Some(100),
        key_uri: Some("key.bin".to_string()),
        iv: None,
    };
    origin.serve("/enc/index.m3u8", media_playlist(12, &options)).await;
    origin.serve("/enc/key.bin", TEST_KEY.to_vec()).await;
    for i in 0..12 {
        let ciphertext = encrypt_segment(&segment_body(i), &TEST_KEY, &derive_iv(100, i));
        origin.serve(&format!("/enc/seg{i}.ts"), ciphertext).await;
    }
    let (downloader, temp_dir) = create_test_downloader();

    let result = downloader
        .download(DownloadRequest::new(
            origin.url("/enc/index.m3u8"),
            temp_dir.path().join("secret.ts"),
            "secret",
        ))
        .await;

    assert_merged(&result, &expected_output(12));
}

#[tokio::test]
async fn explicit_iv_applies_to_every_segment() {
    let origin = HlsOrigin::start().await;
    let iv: [u8; 16] = std::array::from_fn(|i| i as u8);
    let options = MediaOptions {
        media_sequence: Some(7),
        key_uri: Some(origin.url("/keys/k1")),
        iv: Some(format!("0x{}", hex::encode(iv))),
    };
    origin.serve("/enc/index.m3u8", media_playlist(4, &options)).await;
    // Absolute key URI on another path, fetched exactly once
    Mock::given(method("GET"))
        .and(path("/keys/k1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(TEST_KEY.to_vec()))
        .expect(1)
        .mount(&origin.server)
        .await;
    for i in 0..4 {
        let ciphertext = encrypt_segment(&segment_body(i), &TEST_KEY, &iv);
        origin.serve(&format!("/enc/seg{i}.ts"), ciphertext).await;
    }
    let (downloader, temp_dir) = create_test_downloader();

    let result = downloader
        .download(DownloadRequest::new(
            origin.url("/enc/index.m3u8"),
            temp_dir.path().join("fixed-iv.ts"),
            "fixed-iv",
        ))
        .await;

    assert_merged(&result, &expected_output(4));
}

#[tokio::test]
async fn master_playlist_falls_back_to_next_variant() {
    let origin = HlsOrigin::start().await;
    origin
        .serve(
            "/master.m3u8",
            master_playlist(&[(1_000_000, "low/index.m3u8"), (5_000_000, "high/index.m3u8")]),
        )
        .await;
    // The best variant is tried first and fails
    Mock::given(method("GET"))
        .and(path("/high/index.m3u8"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&origin.server)
        .await;
    origin.serve_media("/low", 5).await;
    let (downloader, temp_dir) = create_test_downloader();

    let result = downloader
        .download(DownloadRequest::new(
            origin.url("/master.m3u8"),
            temp_dir.path().join("show.ts"),
            "show",
        ))
        .await;

    assert_merged(&result, &expected_output(5));
}

#[tokio::test]
async fn failed_download_resumes_after_origin_recovers() {
    let origin = HlsOrigin::start().await;
    origin.fail("/vod/seg2.ts", 500, None).await;
    origin.serve_media("/vod", 5).await;
    let (downloader, temp_dir) = create_test_downloader();
    let request = DownloadRequest::new(
        origin.url("/vod/index.m3u8"),
        temp_dir.path().join("resume.ts"),
        "resume",
    );

    let first = downloader.download(request.clone()).await;

    assert_eq!(
        first,
        DownloadResult::Failed(FailureReason::IncompleteAfterRetries {
            missing: 1,
            total: 5
        })
    );
    assert!(!temp_dir.path().join("resume.ts").exists());
    assert!(temp_dir.path().join("resume.progress.json").exists());

    // Origin recovers; only the missing segment may be fetched again
    origin.server.reset().await;
    origin
        .serve("/vod/index.m3u8", media_playlist(5, &MediaOptions::default()))
        .await;
    origin.serve("/vod/seg2.ts", segment_body(2)).await;
    for i in [0usize, 1, 3, 4] {
        Mock::given(method("GET"))
            .and(path(format!("/vod/seg{i}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body(i)))
            .expect(0)
            .mount(&origin.server)
            .await;
    }

    let second = downloader.download(request).await;

    assert_merged(&second, &expected_output(5));
    assert_no_leftovers(temp_dir.path(), "resume");
}

#[tokio::test]
#[serial]
async fn run_with_shutdown_returns_the_download_result() {
    let origin = HlsOrigin::start().await;
    origin.serve_media("/vod", 3).await;
    let (downloader, temp_dir) = create_test_downloader();

    let result = run_with_shutdown(
        downloader,
        DownloadRequest::new(
            origin.url("/vod/index.m3u8"),
            temp_dir.path().join("signal.ts"),
            "signal",
        ),
    )
    .await;

    assert_merged(&result, &expected_output(3));
}
