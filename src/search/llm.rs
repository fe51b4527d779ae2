//! Text generation backends for the LLM proposer, judge and advisors.
//!
//! Two families sit behind [`TextGenerator`]:
//!
//! - [`ChatCompletionsClient`]: OpenAI-compatible `/chat/completions` over
//!   HTTP. Defaults to the Groq endpoint with `GROQ_API_KEY`.
//! - [`AgentCli`]: local agent CLIs (`claude --print -p`, `gemini -o text`,
//!   `codex exec`), run as child processes.
//!
//! Both enforce an explicit timeout. Transport failures (missing credential,
//! network, timeout, non-zero exit) are `ProposerUnavailable`; a response we
//! cannot read is `ProposerParse`.

use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SearchError};

pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama-3.3-70b-versatile";
pub const DEFAULT_API_KEY_ENV: &str = "GROQ_API_KEY";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

pub const SYSTEM_PROMPT: &str = "You are an expert ML researcher. Respond with a single valid JSON \
object only, no markdown fences and no commentary outside the JSON.";

/// Single prompt in, text out.
pub trait TextGenerator {
    /// Backend label for logs and reports.
    fn name(&self) -> String;

    fn generate(&self, prompt: &str) -> Result<String>;
}

// =============================================================================
// HTTP chat completions
// =============================================================================

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat completions client.
pub struct ChatCompletionsClient {
    pub endpoint: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Request `response_format: json_object`
    pub json_mode: bool,
    pub system_prompt: String,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl ChatCompletionsClient {
    /// Build a client; a missing key surfaces as `ProposerUnavailable` on first use.
    pub fn new(api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("oodsearch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SearchError::ProposerUnavailable(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            json_mode: true,
            system_prompt: SYSTEM_PROMPT.to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    /// Read the key from `var` (after `.env` has been loaded).
    pub fn from_env(var: &str, timeout: Duration) -> Result<Self> {
        Self::new(std::env::var(var).ok(), timeout)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn has_credential(&self) -> bool {
        self.api_key.is_some()
    }
}

impl TextGenerator for ChatCompletionsClient {
    fn name(&self) -> String {
        format!("chat:{}", self.model)
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let Some(key) = &self.api_key else {
            return Err(SearchError::ProposerUnavailable(
                "no API key configured for the chat completions backend".to_string(),
            ));
        };

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: self.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(key)
            .json(&request)
            .send()
            .map_err(|e| {
                let kind = if e.is_timeout() { "timed out" } else { "failed" };
                SearchError::ProposerUnavailable(format!("chat request {kind}: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(SearchError::ProposerUnavailable(format!(
                "chat endpoint returned {status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|e| SearchError::ProposerParse(format!("unreadable chat response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SearchError::ProposerParse("chat response has no content".to_string()))?;

        debug!(backend = %self.name(), chars = content.len(), "chat completion received");
        Ok(content)
    }
}

// =============================================================================
// Agent CLIs
// =============================================================================

/// Which local agent CLI to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Agent {
    #[default]
    Claude,
    Gemini,
    /// OpenAI Codex CLI
    Codex,
}

impl FromStr for Agent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "claude" => Ok(Agent::Claude),
            "gemini" => Ok(Agent::Gemini),
            "codex" | "openai" => Ok(Agent::Codex),
            _ => Err(format!("Unknown agent: {}. Use 'claude', 'gemini', or 'codex'", s)),
        }
    }
}

impl std::fmt::Display for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Agent::Claude => write!(f, "claude"),
            Agent::Gemini => write!(f, "gemini"),
            Agent::Codex => write!(f, "codex"),
        }
    }
}

/// A local agent CLI used as a text generator.
#[derive(Debug, Clone)]
pub struct AgentCli {
    pub agent: Agent,
    pub model: Option<String>,
    pub timeout: Duration,
}

/// Captured output of a finished child process.
struct ProcessOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run `cmd`, feeding `stdin` if given, killing it once `timeout` elapses.
fn run_with_timeout(mut cmd: Command, stdin: Option<&str>, timeout: Duration) -> Result<ProcessOutput> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd
        .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SearchError::ProposerUnavailable(format!("Failed to execute {program}: {e}")))?;

    let out = drain(child.stdout.take());
    let err = drain(child.stderr.take());

    // The child may never read its input, so a blocking write must not hold up
    // the timeout loop. The pipe closes when the writer finishes or fails.
    if let (Some(text), Some(mut pipe)) = (stdin, child.stdin.take()) {
        let text = text.to_owned();
        let name = program.clone();
        std::thread::spawn(move || {
            if let Err(e) = pipe.write_all(text.as_bytes()) {
                debug!(program = %name, error = %e, "stdin write stopped early");
            }
        });
    }

    let start = Instant::now();
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SearchError::ProposerUnavailable(format!(
                    "{program} timed out after {}s",
                    timeout.as_secs()
                )));
            }
            None => std::thread::sleep(Duration::from_millis(50)),
        }
    };

    Ok(ProcessOutput {
        success: status.success(),
        stdout: out.join().unwrap_or_default(),
        stderr: err.join().unwrap_or_default(),
    })
}

impl AgentCli {
    pub fn new(agent: Agent, model: Option<String>, timeout: Duration) -> Self {
        Self { agent, model, timeout }
    }

    fn call_claude(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new("claude");
        if let Some(m) = &self.model {
            cmd.args(["--model", m.as_str()]);
        }
        cmd.args(["--print", "-p", prompt]);
        let output = run_with_timeout(cmd, None, self.timeout)?;
        if !output.success {
            return Err(SearchError::ProposerUnavailable(format!(
                "Claude returned error: {}",
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    fn call_gemini(&self, prompt: &str) -> Result<String> {
        let mut cmd = Command::new("gemini");
        cmd.args(["-o", "text", "-y"]);
        if let Some(m) = &self.model {
            cmd.args(["-m", m.as_str()]);
        }
        cmd.arg(prompt);
        let output = run_with_timeout(cmd, None, self.timeout)?;
        if !output.success {
            return Err(SearchError::ProposerUnavailable(format!(
                "Gemini returned error: {}",
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    /// `codex exec` reads the prompt from stdin and writes its answer to a file.
    fn call_codex(&self, prompt: &str) -> Result<String> {
        let output_file =
            std::env::temp_dir().join(format!("oodsearch_codex_{}.txt", std::process::id()));

        let mut cmd = Command::new("codex");
        cmd.args(["exec", "--skip-git-repo-check"]);
        if let Some(m) = &self.model {
            cmd.args(["-m", m.as_str()]);
        }
        cmd.arg("-o").arg(&output_file).arg("-");

        let output = run_with_timeout(cmd, Some(prompt), self.timeout);
        let response = output.and_then(|out| {
            if !out.success {
                return Err(SearchError::ProposerUnavailable(format!(
                    "Codex returned error: {}",
                    out.stderr.trim()
                )));
            }
            std::fs::read_to_string(&output_file)
                .map_err(|e| SearchError::ProposerParse(format!("Failed to read codex output: {e}")))
        });
        let _ = std::fs::remove_file(&output_file);
        Ok(response?.trim().to_string())
    }
}

impl TextGenerator for AgentCli {
    fn name(&self) -> String {
        match &self.model {
            Some(m) => format!("{}:{}", self.agent, m),
            None => self.agent.to_string(),
        }
    }

    fn generate(&self, prompt: &str) -> Result<String> {
        let response = match self.agent {
            Agent::Claude => self.call_claude(prompt),
            Agent::Gemini => self.call_gemini(prompt),
            Agent::Codex => self.call_codex(prompt),
        }?;
        debug!(backend = %self.name(), chars = response.len(), "agent response received");
        Ok(response)
    }
}

// =============================================================================
// Backend selection
// =============================================================================

/// Which backend the CLI wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    /// OpenAI-compatible HTTP endpoint
    #[default]
    Chat,
    Cli(Agent),
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chat" | "groq" | "http" => Ok(Backend::Chat),
            other => other
                .parse::<Agent>()
                .map(Backend::Cli)
                .map_err(|_| format!("Unknown backend: {}. Use chat, claude, gemini or codex", s)),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Chat => write!(f, "chat"),
            Backend::Cli(agent) => write!(f, "{}", agent),
        }
    }
}

/// Connection settings for building a generator.
#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub backend: Backend,
    pub model: Option<String>,
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub timeout: Duration,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Chat,
            model: None,
            endpoint: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl GeneratorSettings {
    pub fn build(&self) -> Result<Box<dyn TextGenerator>> {
        match self.backend {
            Backend::Chat => {
                let mut client = ChatCompletionsClient::from_env(&self.api_key_env, self.timeout)?;
                if let Some(m) = &self.model {
                    client = client.with_model(m.clone());
                }
                if let Some(e) = &self.endpoint {
                    client = client.with_endpoint(e.clone());
                }
                Ok(Box::new(client))
            }
            Backend::Cli(agent) => Ok(Box::new(AgentCli::new(
                agent,
                self.model.clone(),
                self.timeout,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("groq".parse::<Backend>().unwrap(), Backend::Chat);
        assert_eq!("Claude".parse::<Backend>().unwrap(), Backend::Cli(Agent::Claude));
        assert_eq!("openai".parse::<Backend>().unwrap(), Backend::Cli(Agent::Codex));
        assert!("bard".parse::<Backend>().is_err());
        assert_eq!(Backend::Cli(Agent::Gemini).to_string(), "gemini");
    }

    #[test]
    fn test_missing_key_is_unavailable() {
        let client = ChatCompletionsClient::new(None, Duration::from_secs(1)).unwrap();
        assert!(!client.has_credential());
        let err = client.generate("hi").unwrap_err();
        assert!(matches!(err, SearchError::ProposerUnavailable(_)));

        let blank = ChatCompletionsClient::new(Some("  ".into()), Duration::from_secs(1)).unwrap();
        assert!(!blank.has_credential());
    }

    #[test]
    fn test_request_shape() {
        let req = ChatRequest {
            model: DEFAULT_MODEL,
            messages: vec![ChatMessage {
                role: "user",
                content: "x",
            }],
            temperature: 0.2,
            max_tokens: 2048,
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let cmd = Command::new("definitely-not-an-installed-agent-cli");
        let err = run_with_timeout(cmd, None, Duration::from_secs(1)).err().unwrap();
        assert!(matches!(err, SearchError::ProposerUnavailable(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_process_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let start = Instant::now();
        let err = run_with_timeout(cmd, None, Duration::from_millis(200)).err().unwrap();
        assert!(matches!(err, SearchError::ProposerUnavailable(_)));
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_holds_when_child_ignores_large_stdin() {
        // Far larger than a pipe buffer, and the child never reads it.
        let prompt = "x".repeat(4 * 1024 * 1024);
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let start = Instant::now();
        let err = run_with_timeout(cmd, Some(&prompt), Duration::from_millis(300))
            .err()
            .unwrap();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(start.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_stdin_reaches_child() {
        let cmd = Command::new("cat");
        let output = run_with_timeout(cmd, Some("hello agent"), Duration::from_secs(5)).unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "hello agent");
    }
}
