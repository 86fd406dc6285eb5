mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use courier::content::ContentBuffer;
use courier::protocol::{headers, Command};
use courier::request::{GenericInterceptor, Interceptor, InterceptorRegistry, ReceiveInterceptor};
use courier::{
    Agent, AgentClient, AppError, AppResult, Message, ResourceUri, ResponseCode,
};
use parking_lot::Mutex;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::{eventually, start_agent, test_config, write_random};

#[tokio::test]
async fn test_put_and_get_keep_chunked_bodies_intact() -> AppResult<()> {
    let agent = start_agent().await?;
    let local = tempfile::tempdir()?;
    let source = local.path().join("payload.bin");
    // above the chunk threshold, below the split threshold
    let bytes = write_random(&source, 50_000).await?;

    let mut client = agent.client().await?;
    let destination: ResourceUri = "/inbox/payload.bin".parse()?;
    let response = client.put_file(&source, &destination).await?;
    assert_eq!(response.header(headers::RESOURCE_LENGTH), Some("50000"));
    assert_eq!(fs::read(agent.path("/inbox/payload.bin")).await?, bytes);

    let fetched = local.path().join("fetched.bin");
    assert_eq!(client.get_file(&destination, &fetched).await?, 50_000);
    assert_eq!(fs::read(&fetched).await?, bytes);

    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_put_honours_on_exist() -> AppResult<()> {
    let agent = start_agent().await?;
    let local = tempfile::tempdir()?;
    let first = local.path().join("first.txt");
    let second = local.path().join("second.txt");
    fs::write(&first, b"first").await?;
    fs::write(&second, b"second").await?;

    let mut client = agent.client().await?;
    client.put_file(&first, &"/a.txt".parse()?).await?;

    let err = client
        .put_file(&second, &"/a.txt".parse()?)
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::AlreadyExist);
    assert_eq!(fs::read(agent.path("a.txt")).await?, b"first");

    client
        .put_file(&second, &"/a.txt?onExist=overwriteOnExist".parse()?)
        .await?;
    assert_eq!(fs::read(agent.path("a.txt")).await?, b"second");

    client
        .put_file(&first, &"/a.txt?onExist=appendOnExist".parse()?)
        .await?;
    assert_eq!(fs::read(agent.path("a.txt")).await?, b"secondfirst");

    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_put_writes_ack_marker() -> AppResult<()> {
    let agent = start_agent().await?;
    let mut client = agent.client().await?;
    let content = ContentBuffer::from_bytes(agent.temp.path(), "acked", b"payload").await?;
    client
        .put(content, &"/acked.bin?createAck=true".parse()?)
        .await?;

    assert!(agent.path("acked.bin").is_file());
    assert!(agent.path("acked.bin.ack").is_file());
    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_list_exist_and_delete_by_pattern() -> AppResult<()> {
    let agent = start_agent().await?;
    write_random(&agent.path("logs/a.log"), 10).await?;
    write_random(&agent.path("logs/b.log"), 20).await?;
    write_random(&agent.path("logs/c.txt"), 30).await?;

    let mut client = agent.client().await?;
    let pattern: ResourceUri = "/logs/*.log".parse()?;
    assert_eq!(
        client.list(&pattern).await?,
        vec!["/logs/a.log".to_string(), "/logs/b.log".to_string()]
    );
    assert_eq!(client.exist(&"/logs/c.txt".parse()?).await?, Some(30));
    assert_eq!(client.exist(&"/logs/missing.txt".parse()?).await?, None);

    assert_eq!(client.delete(&pattern).await?, 2);
    let err = client.list(&pattern).await.unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::NotExist);
    assert!(agent.path("logs/c.txt").is_file());

    let err = client.delete(&pattern).await.unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::NotExist);

    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_health_and_info() -> AppResult<()> {
    let agent = start_agent().await?;
    let mut client = agent.client().await?;

    assert_eq!(client.health().await?, "UP");
    let info = client.info().await?;
    assert!(info.contains(&("general.agent_name".to_string(), "courier".to_string())));
    assert!(info.contains(&("transfer.max_workers".to_string(), "4".to_string())));
    assert!(!info.iter().any(|(key, _)| key == "general.temp_dir"));

    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_paths_outside_the_repository_are_refused() -> AppResult<()> {
    let agent = start_agent().await?;
    let local = tempfile::tempdir()?;
    let mut client = agent.client().await?;

    let err = client
        .get_file(&"/../secret".parse()?, &local.path().join("secret"))
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::BadRequest);

    // a refused request leaves the connection usable
    assert_eq!(client.health().await?, "UP");
    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_put_with_unknown_session_is_rejected() -> AppResult<()> {
    let agent = start_agent().await?;
    let mut client = agent.client().await?;
    let mut request =
        Message::new(Command::Put, "/x.bin").with_header(headers::SESSION_ID, "no-such-session")?;
    request.set_content(ContentBuffer::from_bytes(agent.temp.path(), "x", b"abc").await?);

    let response = client.exchange(request).await?;
    assert_eq!(response.response_code(), Some(ResponseCode::NotExist));
    assert!(!agent.path("x.bin").exists());

    client.close().await?;
    agent.stop().await
}

#[tokio::test]
async fn test_undecodable_request_gets_bad_request_and_close() -> AppResult<()> {
    let agent = start_agent().await?;
    let mut stream = TcpStream::connect(agent.handle.local_addr()).await?;
    stream.write_all(b"FETCH /a\r\n\r\n").await?;

    let mut raw = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut raw))
        .await
        .map_err(|_| AppError::Timeout("connection not closed".to_string()))??;
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("RESPONSE "));
    assert!(text.contains("Response-Code: 400"));
    assert!(text.contains("Connection: close"));

    agent.stop().await
}

#[tokio::test]
async fn test_body_that_cannot_be_stored_is_answered() -> AppResult<()> {
    let agent = start_agent().await?;
    let local = tempfile::tempdir()?;
    let source = local.path().join("small.bin");
    write_random(&source, 100).await?;
    // bodies are spooled below the temp dir, which is now a plain file
    fs::remove_dir_all(agent.temp.path()).await?;
    fs::write(agent.temp.path(), b"").await?;

    let mut client = agent.client().await?;
    let err = client
        .put_file(&source, &"/small.bin".parse()?)
        .await
        .unwrap_err();
    assert!(!matches!(err, AppError::PrematureClosure(_)));
    assert_eq!(err.response_code(), ResponseCode::InternalServerError);
    assert!(!agent.path("small.bin").exists());

    fs::remove_file(agent.temp.path()).await?;
    agent.stop().await
}

#[tokio::test]
async fn test_shutdown_action_stops_the_agent() -> AppResult<()> {
    let mut agent = start_agent().await?;
    let mut client = agent.client().await?;
    client.shutdown_agent().await?;

    tokio::time::timeout(Duration::from_secs(5), agent.handle.stopped())
        .await
        .map_err(|_| AppError::Timeout("agent did not stop".to_string()))?;
    drop(client);
    agent.stop().await
}

#[derive(Default)]
struct Audit {
    completed: Mutex<Vec<(PathBuf, bool)>>,
}

impl GenericInterceptor for Audit {
    fn after_completion(&self, path: &Path, error: Option<&AppError>) {
        self.completed.lock().push((path.to_path_buf(), error.is_some()));
    }
}

struct RejectExecutables;

impl ReceiveInterceptor for RejectExecutables {
    fn pre_receive(&self, path: &Path) -> AppResult<bool> {
        Ok(path.extension().map_or(true, |ext| ext != "exe"))
    }

    fn post_receive(&self, _path: &Path, _error: Option<&AppError>) {}
}

#[tokio::test]
async fn test_named_interceptors_wrap_requests() -> AppResult<()> {
    let root = tempfile::tempdir()?;
    let temp = tempfile::tempdir()?;
    let backup = tempfile::tempdir()?;
    let config = Arc::new(test_config(root.path(), temp.path(), backup.path()));
    let audit = Arc::new(Audit::default());
    let mut interceptors = InterceptorRegistry::new();
    interceptors
        .register("audit", Interceptor::Generic(audit.clone()))
        .register("no-exe", Interceptor::Receive(Arc::new(RejectExecutables)));
    let handle = Agent::new((*config).clone())
        .with_interceptors(interceptors)
        .bind()
        .await?;
    let mut client = AgentClient::connect(&handle.agent_addr(), config.clone()).await?;

    let content = ContentBuffer::from_bytes(temp.path(), "tool", b"MZ").await?;
    let err = client
        .put(content, &"/tool.exe?interceptor=no-exe".parse()?)
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::InternalServerError);
    assert!(!root.path().join("tool.exe").exists());

    let content = ContentBuffer::from_bytes(temp.path(), "notes", b"hello").await?;
    client
        .put(content, &"/notes.txt?interceptor=no-exe&interceptor=audit".parse()?)
        .await?;
    let expected = (root.path().join("notes.txt"), false);
    assert!(eventually(|| audit.completed.lock().contains(&expected)).await);

    // a refused store still reaches the completion hook
    let content = ContentBuffer::from_bytes(temp.path(), "again", b"again").await?;
    let err = client
        .put(content, &"/notes.txt?interceptor=audit".parse()?)
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::AlreadyExist);
    let failed = (root.path().join("notes.txt"), true);
    assert!(eventually(|| audit.completed.lock().contains(&failed)).await);

    let content = ContentBuffer::from_bytes(temp.path(), "x", b"x").await?;
    let err = client
        .put(content, &"/x.txt?interceptor=missing".parse()?)
        .await
        .unwrap_err();
    assert_eq!(err.response_code(), ResponseCode::BadRequest);

    client.close().await?;
    handle.shutdown().await
}
