//! Plain HTTP/1.1 clients get the static site and never feed the registry.

mod common;

use reqwest::StatusCode;

use common::{fixture, site_config, start_server};

fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn serves_site_over_http1() {
    let server = start_server(site_config()).await;
    let base = format!("http://{}", server.addr);
    let client = client();

    let index = client.get(format!("{base}/")).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.bytes().await.unwrap().to_vec(), fixture("index.html"));

    for asset in ["/style.css", "/script.js", "/black_square.png", "/fonts/test.woff"] {
        let response = client
            .get(format!("{base}{asset}"))
            .header(reqwest::header::REFERER, format!("{base}/"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.bytes().await.unwrap().to_vec(), fixture(asset));
    }

    assert!(server.registry.is_empty());
    server.shutdown.trigger();
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let server = start_server(site_config()).await;

    let response = client()
        .get(format!("http://{}/nope.css", server.addr))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.shutdown.trigger();
}

#[tokio::test]
async fn stops_accepting_after_shutdown() {
    let server = start_server(site_config()).await;
    server.shutdown.trigger();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let result = client()
        .get(format!("http://{}/", server.addr))
        .timeout(std::time::Duration::from_millis(500))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn stalled_preface_connection_is_dropped() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut config = site_config();
    config.timeouts.request_secs = 1;
    let server = start_server(config).await;

    let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    stream.write_all(b"PRI").await.unwrap();

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(std::time::Duration::from_secs(5), stream.read(&mut buf))
        .await
        .expect("server kept the stalled connection open");
    assert!(matches!(read, Ok(0) | Err(_)));

    server.shutdown.trigger();
}
