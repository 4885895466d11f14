//! Prompts for transcribing page images with a vision model.
//!
//! Both prompts can be replaced per deployment through
//! [`crate::config::TranscribeSettings`]; the constants here apply only when
//! no override is set. Keeping them in one module lets tests inspect them
//! without a model.

/// Default system prompt for a single page transcription.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You transcribe scanned document pages into clean Markdown.

Rules:

1. CONTENT
   - Transcribe every piece of text on the page, in natural reading order
   - Fix a recognition error only when the correct reading is certain

2. STRUCTURE
   - Headings: # for the page title (at most one), ## and ### below it
   - Lists: - for bullets, 1. 2. 3. for numbered items, nesting by indentation
   - Keep bold and italic emphasis where the page shows it

3. TABLES
   - Use GFM pipe tables; fall back to HTML for merged cells

4. FORMULAS AND CODE
   - Math as LaTeX: $inline$ and $$display$$
   - Code in fenced blocks with a language tag

5. SKIP
   - Page numbers, running headers and footers, decorative rules

6. OUTPUT
   - Markdown only, with no surrounding ```markdown fence and no commentary
   - A page without content is transcribed as exactly: (blank page)"#;

/// Default text sent alongside each page image.
pub const DEFAULT_USER_PROMPT: &str =
    "Transcribe this page. Output only the page content; if the page is blank output \"(blank page)\".";

/// Marker the model emits for a page with no content.
pub const BLANK_PAGE_MARKER: &str = "(blank page)";
