//! Document layout models for the assessment and report exports. The shell
//! draws each block at its coordinates and saves the result under
//! `file_name`.

use serde::Serialize;

use crate::model::ProgramFields;

const NOT_PROVIDED: &str = "[Not provided]";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBlock {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub font_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentModel {
    pub file_name: String,
    pub blocks: Vec<TextBlock>,
}

fn block(text: impl Into<String>, x: u32, y: u32, font_size: u32) -> TextBlock {
    TextBlock {
        text: text.into(),
        x,
        y,
        font_size,
    }
}

/// Flatten editor HTML to plain text: tags removed, block-level closers turned
/// into line breaks, common entities decoded.
pub fn plain_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let Some(end) = rest[start..].find('>') else {
            out.push_str(&rest[start..]);
            rest = "";
            break;
        };
        let tag = rest[start + 1..start + end].trim().to_ascii_lowercase();
        if matches!(tag.as_str(), "br" | "br/" | "br /" | "/p" | "/li" | "/h1" | "/h2" | "/h3") {
            out.push('\n');
        }
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);

    let decoded = out
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    decoded
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

pub fn assessment_model(fields: &ProgramFields) -> DocumentModel {
    DocumentModel {
        file_name: "assessment.pdf".to_string(),
        blocks: vec![
            block("Assessment Overview", 10, 10, 16),
            block(format!("Method: {}", plain_text(&fields.assessment_method)), 10, 20, 16),
            block(
                format!("Evidence: {}", plain_text(&fields.evidence_of_learning)),
                10,
                30,
                16,
            ),
        ],
    }
}

pub fn report_model(fields: &ProgramFields) -> DocumentModel {
    let or_placeholder = |html: &str| {
        let text = plain_text(html);
        if text.is_empty() {
            NOT_PROVIDED.to_string()
        } else {
            text
        }
    };
    DocumentModel {
        file_name: "student-report.pdf".to_string(),
        blocks: vec![
            block("Student Report Summary", 20, 20, 14),
            block("Teacher Comment:", 20, 30, 11),
            block(or_placeholder(&fields.teacher_comment), 20, 38, 11),
            block("Student Voice:", 20, 50, 11),
            block(or_placeholder(&fields.student_voice), 20, 58, 11),
            block("Parent Summary:", 20, 70, 11),
            block(or_placeholder(&fields.parent_summary), 20, 78, 11),
            block(
                format!("Engagement Rating: {}", fields.engagement_rating.get()),
                20,
                90,
                11,
            ),
        ],
    }
}
