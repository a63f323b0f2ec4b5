use iori_dash::{ByteRange, ClientOptions, DashError, Downloader, HttpDownloader, MpdClient};
use reqwest::{Client, StatusCode};
use url::Url;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::init_tracing;

async fn setup_mock_server(body: &str) -> (Url, MockServer) {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&mock_server)
        .await;

    let uri = format!("{}/manifest.mpd", mock_server.uri()).parse().unwrap();
    (uri, mock_server)
}

#[tokio::test]
async fn test_fetch_with_range() -> anyhow::Result<()> {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/video.mp4"))
        .and(header("Range", "bytes=842-1201"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(vec![0u8; 360]))
        .mount(&mock_server)
        .await;

    let downloader = HttpDownloader::new(Client::builder())?;
    let url: Url = format!("{}/video.mp4", mock_server.uri()).parse()?;
    let fetched = downloader
        .fetch(&url, Some(&ByteRange::new(842, Some(360))))
        .await?;
    assert_eq!(fetched.data.len(), 360);
    assert_eq!(fetched.url, url);

    Ok(())
}

#[tokio::test]
async fn test_fetch_error_status() -> anyhow::Result<()> {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone.mpd"))
        .respond_with(ResponseTemplate::new(410).set_body_string("gone"))
        .mount(&mock_server)
        .await;

    let downloader = HttpDownloader::new(Client::builder())?;
    let url: Url = format!("{}/gone.mpd", mock_server.uri()).parse()?;
    let result = downloader.fetch(&url, None).await;
    assert!(matches!(result, Err(DashError::HttpError(StatusCode::GONE))));

    Ok(())
}

#[tokio::test]
async fn test_load_resolves_against_server() -> anyhow::Result<()> {
    init_tracing();
    let (uri, server) = setup_mock_server(include_str!("../fixtures/two_periods.mpd")).await;

    let client = MpdClient::new(HttpDownloader::new(Client::builder())?, ClientOptions::default());
    client.load(uri.clone()).await?;
    assert_eq!(client.mpd_uri(), Some(uri));

    let stream = client.setup_streaming(0)?;
    client.seek_to_first_segment()?;
    let fragment = client.get_next_fragment(stream)?;
    assert_eq!(
        fragment.uri.as_str(),
        format!("{}/v100/seg-001.m4s", server.uri())
    );

    Ok(())
}

#[tokio::test]
async fn test_load_follows_redirect() -> anyhow::Result<()> {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/play"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/edge/vod/manifest.mpd"),
        )
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/edge/vod/manifest.mpd"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("../fixtures/two_periods.mpd")),
        )
        .mount(&mock_server)
        .await;

    let client = MpdClient::new(HttpDownloader::new(Client::builder())?, ClientOptions::default());
    let uri: Url = format!("{}/play", mock_server.uri()).parse()?;
    client.load(uri.clone()).await?;

    assert_eq!(client.mpd_uri(), Some(uri));
    let base = client.mpd_base_uri().unwrap();
    assert_eq!(base.path(), "/edge/vod/manifest.mpd");

    client.set_period_id("main")?;
    let stream = client.setup_streaming(0)?;
    assert_eq!(client.base_url(stream)?.path(), "/edge/vod/main/");

    Ok(())
}

#[tokio::test]
async fn test_refresh_over_http() -> anyhow::Result<()> {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("../fixtures/two_periods.mpd")),
        )
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let options = ClientOptions {
        max_update_failures: 2,
        ..Default::default()
    };
    let client = MpdClient::new(HttpDownloader::new(Client::builder())?, options);
    client
        .load(format!("{}/manifest.mpd", mock_server.uri()).parse()?)
        .await?;

    assert!(matches!(
        client.refresh().await,
        Err(DashError::HttpError(StatusCode::SERVICE_UNAVAILABLE))
    ));
    assert!(matches!(
        client.refresh().await,
        Err(DashError::RefreshFailed { attempts: 2, max: 2 })
    ));
    assert!(client.presentation().is_some());

    Ok(())
}

#[tokio::test]
async fn test_cookies_are_sent() -> anyhow::Result<()> {
    init_tracing();
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manifest.mpd"))
        .and(header("Cookie", "session=abc"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(include_str!("../fixtures/on_demand.mpd")),
        )
        .mount(&mock_server)
        .await;

    let downloader = HttpDownloader::new(Client::builder())?;
    let uri: Url = format!("{}/manifest.mpd", mock_server.uri()).parse()?;
    downloader.add_cookies(vec!["session=abc".to_string()], &uri);

    let client = MpdClient::new(downloader, ClientOptions::default());
    client.load(uri).await?;
    assert!(client.has_isoff_ondemand_profile());

    Ok(())
}
