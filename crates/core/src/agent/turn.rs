use parley_checkpoint::CheckpointSource;
use parley_model::{ModelMessage, ModelRequest};
use tokio::select;

use super::state::{AgentContext, AgentStage};
use crate::conversation::{Conversation, TranscriptSource};
use crate::error::Error;

/// Runs one user input through the model/tool loop and returns the final
/// answer.
///
/// The conversation is saved after the input is appended and after every
/// model call and tool round, so a failed turn keeps what it got done.
pub(crate) async fn run_turn(
    ctx: &AgentContext,
    conversation: &mut Conversation,
    input: String,
) -> Result<String, Error> {
    if let Some(on_transcript) = &ctx.callbacks.on_transcript {
        on_transcript(&input, TranscriptSource::User);
    }
    conversation.push(ModelMessage::User(input));
    save(ctx, conversation, CheckpointSource::Input).await?;

    for step in 0..ctx.max_steps {
        ctx.set_stage(AgentStage::ModelThinking);
        let req = build_request(ctx, conversation);
        let on_transcript = ctx.callbacks.on_transcript.clone();
        let request =
            ctx.model_client
                .send_request(req, ctx.backoff.clone(), move |delta| {
                    if let Some(on_transcript) = &on_transcript {
                        on_transcript(&delta, TranscriptSource::Assistant);
                    }
                });
        let resp = unless_cancelled(ctx, request)
            .await?
            .map_err(Error::Model)?;
        trace!("step {step} finished with {:?}", resp.finish_reason);

        let message = resp.into_message();
        let tool_calls = message.tool_calls.clone();
        let answer = message.content.clone();
        conversation.push(ModelMessage::Assistant(message));
        save(ctx, conversation, CheckpointSource::Loop).await?;

        if tool_calls.is_empty() {
            return Ok(answer);
        }

        ctx.set_stage(AgentStage::RunningTools);
        if let Some(on_tool_call) = &ctx.callbacks.on_tool_call {
            for call in &tool_calls {
                on_tool_call(call);
            }
        }
        let results =
            unless_cancelled(ctx, ctx.executor.run(tool_calls)).await?;
        for result in results {
            conversation.push(ModelMessage::Tool(result));
        }
        save(ctx, conversation, CheckpointSource::Loop).await?;
    }

    warn!("giving up after {} model calls", ctx.max_steps);
    Err(Error::StepLimitExceeded(ctx.max_steps))
}

fn build_request(ctx: &AgentContext, conversation: &Conversation) -> ModelRequest {
    let mut messages = Vec::with_capacity(conversation.items().len() + 1);
    if let Some(prompt) = &ctx.system_prompt {
        messages.push(ModelMessage::System(prompt.clone()));
    }
    messages.extend(conversation.messages());
    ModelRequest {
        messages,
        tools: ctx.executor.definitions(),
    }
}

/// Races `fut` against shutdown. Checkpoint writes are never raced, so a
/// stopped agent has no write in flight.
async fn unless_cancelled<F: Future>(
    ctx: &AgentContext,
    fut: F,
) -> Result<F::Output, Error> {
    select! {
        biased;

        _ = ctx.cancelled() => Err(Error::AgentClosed),
        output = fut => Ok(output),
    }
}

async fn save(
    ctx: &AgentContext,
    conversation: &mut Conversation,
    source: CheckpointSource,
) -> Result<(), Error> {
    let checkpoint = conversation.next_checkpoint(&ctx.thread_id, source);
    ctx.checkpointer.put(&checkpoint).await?;
    conversation.set_head(checkpoint);
    Ok(())
}
