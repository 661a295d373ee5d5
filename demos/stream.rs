//! In-process walkthrough of one chat run: a scripted model and two demo
//! tools stream through the orchestrator, and a client turn decodes the
//! merged bytes back into text and tool rows.
//!
//! Usage:
//!   cargo run --example stream
//!   cargo run --example stream -- --chunk-size 3 --token-delay-ms 40
//!   RUST_LOG=toolstream=debug cargo run --example stream -- --fail

use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use futures::stream;
use serde_json::{json, Value};
use toolstream::{
    CanvasMode, ChatTurn, ClientConfig, Orchestrator, Progress, ToolCall, ToolError,
    ToolHandler, ToolOutput, ToolSet, ToolState, ToolStatus, TokenSource, UiSink, View,
};

#[derive(Parser)]
#[command(name = "stream", about = "Stream a scripted chat run with tool events")]
struct Cli {
    /// Re-chunk the merged output into pieces of this many bytes
    #[arg(long, default_value_t = 5)]
    chunk_size: usize,

    /// Delay between model tokens
    #[arg(long, default_value_t = 25)]
    token_delay_ms: u64,

    /// Make the research tool fail
    #[arg(long)]
    fail: bool,
}

struct ResearchTool {
    fail: bool,
}

#[async_trait]
impl ToolHandler for ResearchTool {
    fn label(&self) -> &str {
        "Researching the market"
    }

    async fn run(&self, input: &Value, progress: &Progress) -> Result<ToolOutput, ToolError> {
        let topic = input["topic"].as_str().unwrap_or("your idea");
        progress.stage("search", &format!("Searching for {topic}")).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        if self.fail {
            return Err(ToolError::Failed("search provider unavailable".into()));
        }
        progress.stage("summarize", "Summarizing competitors").await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        Ok(ToolOutput::ok("3 competitors found"))
    }
}

struct WebsiteTool;

#[async_trait]
impl ToolHandler for WebsiteTool {
    fn label(&self) -> &str {
        "Building website"
    }

    async fn run(&self, _input: &Value, progress: &Progress) -> Result<ToolOutput, ToolError> {
        progress.stage("layout", "Laying out sections").await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        progress
            .code_change(
                "index.html",
                "Add hero section",
                None,
                Some("<section class=\"hero\">Fresh bread daily</section>"),
            )
            .await;
        progress.stage("style", "Applying brand colors").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        Ok(ToolOutput::ok("site generated"))
    }
}

struct PrintUi;

impl UiSink for PrintUi {
    fn set_active_view(&mut self, view: View) {
        println!("  [ui] switch view -> {view:?}");
    }

    fn set_canvas_mode(&mut self, mode: CanvasMode) {
        println!("  [ui] canvas -> {mode:?}");
    }
}

fn print_tool(tool: &ToolStatus) {
    let state = match tool.state {
        ToolState::Pending => "pending",
        ToolState::Running => "running",
        ToolState::Complete => "done",
        ToolState::Error => "error",
    };
    let duration = tool.duration_label.as_deref().unwrap_or("-");
    println!("  {:<18} {:<7} {:>7}  {}", tool.name, state, duration, tool.label);
    for stage in &tool.stages {
        println!("      - {} ({:?})", stage.message, stage.state);
    }
    for change in &tool.changes {
        println!("      * {}: {}", change.file, change.description);
    }
    if let Some(error) = &tool.error {
        println!("      ! {error}");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolstream=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let tools = ToolSet::new()
        .add("market_research", ResearchTool { fail: cli.fail })
        .add("generate_website", WebsiteTool);
    let orchestrator = Orchestrator::new(tools);

    let tokens = [
        "Sure! ", "I'll ", "research ", "bakeries ", "and ", "build ", "your ", "site. ",
        "Ignore ", "this ", "stray ", "\u{27E6}", "marker. ", "Done ", "soon.",
    ];
    let delay = Duration::from_millis(cli.token_delay_ms);
    let model = TokenSource::new(Box::pin(stream::unfold(0usize, move |i| async move {
        let token = tokens.get(i)?;
        tokio::time::sleep(delay).await;
        Some((Ok::<_, std::convert::Infallible>(token.to_string()), i + 1))
    })));

    let (tx, calls) = orchestrator.call_channel();
    let mut handle = orchestrator.start(model, calls);
    for call in [
        ToolCall::new("market_research", json!({ "topic": "bakeries" })),
        ToolCall::new("generate_website", json!({})),
    ] {
        if tx.send(call).await.is_err() {
            eprintln!("error: run ended before tool calls were accepted");
            std::process::exit(1);
        }
    }
    drop(tx);

    let mut turn = ChatTurn::new(PrintUi, &ClientConfig::new("demo"));
    let chunk_size = cli.chunk_size.max(1);
    while let Some(chunk) = handle.next_chunk().await {
        for piece in chunk.chunks(chunk_size) {
            turn.feed(piece);
        }
    }
    let outcome = turn.finish().await;

    println!();
    println!("text: {}", outcome.text);
    println!("tools:");
    for tool in &outcome.tools {
        print_tool(tool);
    }
    if outcome.dropped_frames > 0 {
        println!("dropped frames: {}", outcome.dropped_frames);
    }
}
