use pw_types::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Promptwise Basic Usage Example");

    // Build a candidate artifact by hand
    let artifact = CandidateArtifact::new("sentiment")
        .with_message(Message::system("Label the sentiment of the text."))
        .with_message(Message::user("Text: {text}"))
        .with_response_format(Some(ResponseFormat::JsonObject));
    println!("Created artifact with {} messages", artifact.messages.len());

    // Render it in the artifact text format
    let text = artifact.dump();
    println!("Dumped artifact:\n{}", text);

    // Parse an artifact embedded in model output
    let raw = format!("Proposed revision:\n```prompt\n{}\n```", text);
    let parsed = CandidateArtifact::from_fenced_text(&raw)?;
    println!("Parsed {} messages back", parsed.messages.len());

    // Attach a few-shot example
    let example = Example::single("text", "I loved it", "positive");
    let with_demos = parsed.with_fewshot(vec![example]);
    println!("Artifact now carries {} few-shot examples", with_demos.fewshot.len());

    println!(
        "Response format description: {}",
        describe_response_format(artifact.response_format.as_ref())
    );

    Ok(())
}
