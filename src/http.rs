use reqwest::blocking::{Client, ClientBuilder};
use std::time::Duration;

pub const USER_AGENT: &str = concat!("gh-repo-stats/", env!("CARGO_PKG_VERSION"));

/// Requests wait as long as the remote side takes. The blocking builder
/// otherwise defaults to 30 seconds.
pub const REQUEST_TIMEOUT: Option<Duration> = None;

/// Create the blocking HTTP client shared by the catalog sources and the
/// aggregation backend.
pub fn create_http_client() -> reqwest::Result<Client> {
    ClientBuilder::new()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_create_http_client() {
        assert!(create_http_client().is_ok());
    }

    #[test]
    fn test_user_agent_names_the_tool() {
        assert!(USER_AGENT.starts_with("gh-repo-stats/"));
    }

    #[test]
    fn test_no_local_request_timeout() {
        assert_eq!(REQUEST_TIMEOUT, None);
    }

    #[test]
    fn test_slow_response_is_awaited() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            thread::sleep(Duration::from_millis(1500));
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .unwrap();
        });

        let client = ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .no_proxy()
            .build()
            .unwrap();
        let body = client
            .get(format!("http://{}/", addr))
            .send()
            .unwrap()
            .text()
            .unwrap();
        assert_eq!(body, "ok");
        server.join().unwrap();
    }
}
