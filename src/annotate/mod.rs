use crate::types::{Annotation, AnnotationKind};


// ===================================================================
// Feedback transcript
// ===================================================================

/// Render annotations as the markdown feedback document sent back to the
/// agent. Annotations are grouped by kind, in a fixed section order, so the
/// agent sees deletions before replacements before insertions before
/// free-form comments. No annotations means the generic one-liner.
pub fn serialize_feedback(annotations: &[Annotation]) -> String {
    if annotations.is_empty() {
        return "Plan changes requested.".to_string();
    }

    let mut lines: Vec<String> = vec![
        "## Plan Review Feedback".to_string(),
        String::new(),
        "The following changes were requested before proceeding:".to_string(),
        String::new(),
    ];

    let of_kind = |kind: AnnotationKind| -> Vec<&Annotation> {
        annotations.iter().filter(|a| a.kind == kind).collect()
    };

    let deletions = of_kind(AnnotationKind::Deletion);
    if !deletions.is_empty() {
        lines.push("### Requested Deletions".to_string());
        lines.push(String::new());
        for annotation in &deletions {
            lines.push(format!("- Remove: ~~{}~~", annotation.text));
        }
        lines.push(String::new());
    }

    let replacements = of_kind(AnnotationKind::Replacement);
    if !replacements.is_empty() {
        lines.push("### Requested Replacements".to_string());
        lines.push(String::new());
        for annotation in &replacements {
            lines.push(format!(
                "- Replace \"{}\" with \"{}\"",
                annotation.text,
                annotation.replacement.as_deref().unwrap_or_default()
            ));
        }
        lines.push(String::new());
    }

    let insertions = of_kind(AnnotationKind::Insertion);
    if !insertions.is_empty() {
        lines.push("### Requested Insertions".to_string());
        lines.push(String::new());
        for annotation in &insertions {
            lines.push(format!(
                "- After \"{}\", insert: \"{}\"",
                annotation.text,
                annotation.replacement.as_deref().unwrap_or_default()
            ));
        }
        lines.push(String::new());
    }

    let comments = of_kind(AnnotationKind::Comment);
    if !comments.is_empty() {
        lines.push("### Comments".to_string());
        lines.push(String::new());
        for annotation in &comments {
            lines.push(format!(
                "- On \"{}\": {}",
                annotation.text,
                annotation.comment.as_deref().unwrap_or_default()
            ));
        }
        lines.push(String::new());
    }

    lines.push("Please revise the plan to address this feedback and present it again.".to_string());
    lines.join("\n")
}

// ===================================================================
// Annotation merge
// ===================================================================

/// Apply annotations to the plan text, producing the edited document.
///
/// The text is segmented into blocks at blank-line boundaries, matching the
/// segmentation annotation offsets were recorded against. Within each block,
/// edits are applied in descending start order so earlier offsets stay valid
/// while later spans are rewritten. Offsets are character positions and are
/// clamped to the block. Blocks left blank by their edits are dropped.
pub fn apply_annotations(plan_text: &str, annotations: &[Annotation]) -> String {
    let mut blocks = split_blocks(plan_text);

    for (index, block) in blocks.iter_mut().enumerate() {
        let mut edits: Vec<&Annotation> = annotations
            .iter()
            .filter(|a| a.block_index == index)
            .collect();
        edits.sort_by(|a, b| b.start_offset.cmp(&a.start_offset));
        for edit in edits {
            *block = apply_edit(block, edit);
        }
    }

    blocks.retain(|block| !block.trim().is_empty());
    blocks.join("\n\n")
}

fn split_blocks(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn apply_edit(block: &str, annotation: &Annotation) -> String {
    let chars: Vec<char> = block.chars().collect();
    let start = annotation.start_offset.min(chars.len());
    let end = annotation.end_offset.clamp(start, chars.len());

    let head: String = chars[..start].iter().collect();
    let span: String = chars[start..end].iter().collect();
    let tail: String = chars[end..].iter().collect();
    let replacement = annotation.replacement.as_deref().unwrap_or_default();

    match annotation.kind {
        AnnotationKind::Deletion => format!("{head}{tail}"),
        AnnotationKind::Replacement => format!("{head}{replacement}{tail}"),
        AnnotationKind::Insertion => format!("{head}{span}{replacement}{tail}"),
        AnnotationKind::Comment => block.to_string(),
    }
}
