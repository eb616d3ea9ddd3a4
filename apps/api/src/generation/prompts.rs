// Prompt text for article and outline generation.

use crate::llm_client::Prompt;

pub const SYSTEM_PREAMBLE: &str =
    "You are SolidWriter, an expert AI writing assistant that creates long-form content.";

const STYLE_INTRO: &str =
    "Analyze the following user writing samples to understand the writing style:";

const STYLE_OUTRO: &str =
    "Use this writing style to create content that mimics the tone, voice, and writing patterns.";

pub const ARTICLE_TEMPERATURE: f32 = 0.7;
pub const ARTICLE_MAX_TOKENS: u32 = 4000;
pub const OUTLINE_TEMPERATURE: f32 = 0.5;
pub const OUTLINE_MAX_TOKENS: u32 = 2000;

/// Everything a prompt is assembled from.
#[derive(Debug, Clone, Default)]
pub struct PromptInputs<'a> {
    pub topic: &'a str,
    pub context: Option<&'a str>,
    pub outline: Option<&'a str>,
    pub voice_samples: &'a [String],
}

/// Preamble, then numbered style samples when any exist, then the context.
pub fn system_prompt(voice_samples: &[String], context: Option<&str>) -> String {
    let mut prompt = SYSTEM_PREAMBLE.to_string();

    if !voice_samples.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(STYLE_INTRO);
        for (index, sample) in voice_samples.iter().enumerate() {
            prompt.push_str(&format!("\n\nSample {}:\n{}", index + 1, sample));
        }
        prompt.push_str("\n\n");
        prompt.push_str(STYLE_OUTRO);
    }

    if let Some(context) = context {
        prompt.push_str(&format!("\n\nAdditional context: {context}"));
    }

    prompt
}

pub fn article_prompt(inputs: &PromptInputs<'_>) -> Prompt {
    let mut user_messages = vec![format!(
        "Write a comprehensive article about: {}",
        inputs.topic
    )];
    if let Some(outline) = inputs.outline {
        user_messages.push(format!("Follow this outline structure:\n{outline}"));
    }

    Prompt {
        system: system_prompt(inputs.voice_samples, inputs.context),
        user_messages,
        temperature: ARTICLE_TEMPERATURE,
        max_tokens: Some(ARTICLE_MAX_TOKENS),
    }
}

/// Outline prompts ignore voice samples.
pub fn outline_prompt(topic: &str, context: Option<&str>) -> Prompt {
    Prompt {
        system: system_prompt(&[], context),
        user_messages: vec![format!(
            "Create a detailed outline for an article about \"{topic}\". \
             Include main sections and subsections."
        )],
        temperature: OUTLINE_TEMPERATURE,
        max_tokens: Some(OUTLINE_MAX_TOKENS),
    }
}
