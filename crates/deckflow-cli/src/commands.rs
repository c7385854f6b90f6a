//! Subcommand handlers

use anyhow::{bail, Context, Result};
use clap::ArgMatches;
use deckflow_core::{
    AdaptivePoller, ApplyOutcome, Cadence, ChangeEvent, DeckflowConfig, PipelineOrchestrator,
    RemoteSync, RunParameters, ScopeHint,
};
use deckflow_model::{
    NewPresentation, Presentation, PresentationId, ResearchMethod, SlideId, StageKind,
    StepStatus, WizardSuggestion,
};
use deckflow_remote::HttpRemote;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Parse `key=value`; the value is read as JSON, falling back to a string
pub(crate) fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn remote(config: &DeckflowConfig) -> Result<Arc<dyn RemoteSync>> {
    let client = HttpRemote::new(&config.remote).context("building HTTP client")?;
    tracing::debug!("using service at {}", client.base_url());
    Ok(Arc::new(client))
}

async fn open(config: &DeckflowConfig, args: &ArgMatches) -> Result<PipelineOrchestrator> {
    let id = args
        .get_one::<String>("id")
        .map(|s| PresentationId::from(s.as_str()))
        .context("missing presentation id")?;
    let orchestrator = PipelineOrchestrator::open(
        remote(config)?,
        &id,
        AdaptivePoller::new(),
        config.sync.clone(),
    )
    .await
    .with_context(|| format!("opening presentation {id}"))?;
    Ok(orchestrator)
}

fn render(orchestrator: &PipelineOrchestrator) -> String {
    let presentation = orchestrator.presentation();
    let mut out = format!("{} ({})\n", presentation.name, presentation.id);
    if !presentation.topic.is_empty() {
        out.push_str(&format!("topic: {}\n", presentation.topic));
    }
    out.push('\n');
    out.push_str(&render_stages(orchestrator, &presentation));
    out.push('\n');
    for slide in &presentation.slides {
        out.push_str(&format!(
            "  {:>3}  [{}] {}\n",
            slide.position,
            slide.id,
            if slide.title.is_empty() { "(untitled)" } else { slide.title.as_str() }
        ));
    }
    if presentation.slides.is_empty() {
        out.push_str("  no slides\n");
    }
    out
}

fn render_stages(orchestrator: &PipelineOrchestrator, presentation: &Presentation) -> String {
    let unused = match presentation.research_method {
        ResearchMethod::Ai => StageKind::ManualResearch,
        ResearchMethod::Manual => StageKind::Research,
    };
    let mut out = String::new();
    for stage in StageKind::ALL {
        let status = presentation.status(stage);
        let mut line = format!("  {:<16} {:<11}", stage.as_str(), status.as_str());
        if stage == unused {
            line.push_str(" (unused)");
        } else if !orchestrator.is_enabled(stage) {
            line.push_str(" (blocked)");
        }
        if status == StepStatus::Error {
            if let Some(message) = presentation
                .steps
                .get(&stage)
                .and_then(|s| s.error_message.as_deref())
            {
                line.push_str(&format!(" - {message}"));
            }
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

fn describe(event: &ChangeEvent) -> Option<String> {
    match event {
        ChangeEvent::StepChanged { stage, status } => Some(format!("{stage}: {status}")),
        ChangeEvent::SlidesChanged => Some("slides changed".into()),
        ChangeEvent::RunFailed { stage, error } => Some(format!("{stage} failed: {error}")),
        ChangeEvent::SuggestionApplyFailed { error } => Some(format!("apply failed: {error}")),
        ChangeEvent::SelectionChanged(_)
        | ChangeEvent::SuggestionChanged(_)
        | ChangeEvent::SnapshotApplied { .. } => None,
    }
}

/// Print changes until `done` holds after a snapshot, ctrl-c, or the deadline
async fn follow(
    orchestrator: &PipelineOrchestrator,
    deadline: Option<Duration>,
    done: impl Fn(&PipelineOrchestrator) -> bool,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded::<ChangeEvent>();
    let subscription = orchestrator.subscribe(move |event| {
        let _ = tx.unbounded_send(event.clone());
    });
    orchestrator.start();

    let sleep = async {
        match deadline {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(sleep);

    let result = loop {
        tokio::select! {
            event = rx.next() => {
                let Some(event) = event else { break Ok(()) };
                if let Some(line) = describe(&event) {
                    println!("{line}");
                }
                if matches!(event, ChangeEvent::SnapshotApplied { .. }) && done(orchestrator) {
                    break Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break Ok(());
            }
            () = &mut sleep => {
                break Err(anyhow::anyhow!("gave up waiting on {}", orchestrator.id()));
            }
        }
    };

    orchestrator.unsubscribe(subscription);
    orchestrator.shutdown();
    result
}

pub(crate) async fn status(config: &DeckflowConfig, args: &ArgMatches) -> Result<()> {
    let orchestrator = open(config, args).await?;
    print!("{}", render(&orchestrator));
    if let Some(selected) = orchestrator.selected_slide() {
        println!("selected: {selected}");
    }
    Ok(())
}

pub(crate) async fn watch(config: &DeckflowConfig, args: &ArgMatches) -> Result<()> {
    let orchestrator = open(config, args).await?;
    print!("{}", render(&orchestrator));
    let deadline = args.get_one::<u64>("timeout").map(|s| Duration::from_secs(*s));
    follow(&orchestrator, deadline, |o| o.cadence() == Cadence::Idle).await?;
    print!("\n{}", render_stages(&orchestrator, &orchestrator.presentation()));
    Ok(())
}

pub(crate) async fn run(config: &DeckflowConfig, args: &ArgMatches) -> Result<()> {
    let orchestrator = open(config, args).await?;
    let stage = *args
        .get_one::<StageKind>("stage")
        .context("missing stage")?;
    let params = args
        .get_many::<(String, Value)>("param")
        .into_iter()
        .flatten()
        .fold(RunParameters::new(), |p, (k, v)| p.with(k.clone(), v.clone()));

    let ack = orchestrator
        .request_run(stage, params)
        .await
        .with_context(|| format!("running {stage}"))?;
    match ack.job_id {
        Some(job) => println!("{stage} accepted (job {job})"),
        None => println!("{stage} accepted"),
    }

    if args.get_flag("wait") {
        follow(&orchestrator, None, move |o| o.status(stage).is_terminal()).await?;
        let status = orchestrator.status(stage);
        println!("{stage}: {status}");
        if status == StepStatus::Error {
            bail!("{stage} finished with an error");
        }
    }
    Ok(())
}

fn print_suggestion(suggestion: &WizardSuggestion) -> Result<()> {
    println!("suggestion {} ({})", suggestion.id, suggestion.scope());
    println!("{}", serde_json::to_string_pretty(&suggestion.patch)?);
    Ok(())
}

pub(crate) async fn suggest(config: &DeckflowConfig, args: &ArgMatches) -> Result<()> {
    let orchestrator = open(config, args).await?;
    let prompt = args.get_one::<String>("prompt").context("missing prompt")?;

    let hint = match args.get_one::<String>("slide") {
        Some(slide) => {
            let slide = SlideId::from(slide.as_str());
            orchestrator
                .select_slide(Some(slide.clone()))
                .with_context(|| format!("selecting slide {slide}"))?;
            ScopeHint::Slide(slide)
        }
        None => ScopeHint::Deck,
    };

    let Some(suggestion) = orchestrator
        .request_suggestion_scoped(prompt.as_str(), hint)
        .await
        .context("requesting suggestion")?
    else {
        println!("no change suggested");
        return Ok(());
    };
    print_suggestion(&suggestion)?;

    if args.get_flag("apply") {
        match orchestrator.apply_suggestion().await.context("applying suggestion")? {
            ApplyOutcome::Applied => println!("applied"),
            ApplyOutcome::NoOp => println!("nothing to apply"),
        }
    }
    orchestrator.shutdown();
    Ok(())
}

pub(crate) async fn create(config: &DeckflowConfig, args: &ArgMatches) -> Result<()> {
    let name = args.get_one::<String>("name").context("missing name")?;
    let topic = args.get_one::<String>("topic").context("missing topic")?;
    let mut new = NewPresentation::new(name.as_str(), topic.as_str());
    if let Some(author) = args.get_one::<String>("author") {
        new = new.with_author(author.as_str());
    }
    if args.get_flag("manual") {
        new = new.with_research_method(ResearchMethod::Manual);
    }

    let orchestrator = PipelineOrchestrator::create(
        remote(config)?,
        new,
        AdaptivePoller::new(),
        config.sync.clone(),
    )
    .await
    .context("creating presentation")?;
    println!("{}", orchestrator.id());
    Ok(())
}
