//! Page actions exposed to the browser agent as tools

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::page::PageDriver;
use crate::tools::registry::ToolRegistry;
use crate::tools::{required_str, ParameterProperty, ParameterSchema, Tool, ToolContext, ToolResult};

/// Interactive elements listed per call
const MAX_INTERACTIVE: usize = 60;

/// Build the registry the browser agent works with
pub fn browser_registry(page: Arc<dyn PageDriver>, max_content_chars: usize) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(GoToUrl(Arc::clone(&page)));
    registry.register(ClickElement(Arc::clone(&page)));
    registry.register(InputText(Arc::clone(&page)));
    registry.register(ExtractContent {
        page: Arc::clone(&page),
        max_chars: max_content_chars,
    });
    registry.register(ListInteractive(Arc::clone(&page)));
    registry.register(Scroll(Arc::clone(&page)));
    registry.register(GoBack(page));
    registry.register(Done);
    registry
}

/// Quote a value as a JavaScript string literal
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[derive(Debug, Deserialize)]
struct ActionOutcome {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

fn parse_outcome(value: Value) -> ActionOutcome {
    serde_json::from_value(value).unwrap_or(ActionOutcome {
        ok: false,
        error: Some("Unexpected script result".to_string()),
        text: None,
    })
}

async fn page_location(page: &dyn PageDriver) -> String {
    match page.evaluate("location.href").await {
        Ok(Value::String(url)) => url,
        _ => "unknown".to_string(),
    }
}

struct GoToUrl(Arc<dyn PageDriver>);

#[async_trait]
impl Tool for GoToUrl {
    fn name(&self) -> &str {
        "go_to_url"
    }

    fn description(&self) -> &str {
        "Open a URL in the current tab."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("url", ParameterProperty::string("Absolute http(s) URL"))
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let url = required_str(args, "url")?;

        let parsed = match url::Url::parse(url) {
            Ok(u) => u,
            Err(e) => return Ok(ToolResult::error(format!("Invalid URL: {}", e))),
        };
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Ok(ToolResult::error("Only HTTP and HTTPS URLs are supported"));
        }

        if let Err(e) = self.0.navigate(parsed.as_str()).await {
            return Ok(ToolResult::error(e.to_string()));
        }

        let title = self.0.evaluate("document.title").await.unwrap_or(Value::Null);
        Ok(ToolResult::success(format!(
            "Navigated to {} (title: {})",
            parsed,
            title.as_str().unwrap_or("")
        )))
    }
}

struct ClickElement(Arc<dyn PageDriver>);

#[async_trait]
impl Tool for ClickElement {
    fn name(&self) -> &str {
        "click_element"
    }

    fn description(&self) -> &str {
        "Click the element matching a CSS selector. Use selectors from list_interactive."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required("selector", ParameterProperty::string("CSS selector"))
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let selector = required_str(args, "selector")?;
        let script = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return {{ ok: false, error: 'No element matches selector' }};
  el.scrollIntoView({{ block: 'center' }});
  el.click();
  return {{ ok: true, text: (el.innerText || el.value || '').trim().slice(0, 100) }};
}})()"#,
            sel = js_string(selector)
        );

        let outcome = parse_outcome(self.0.evaluate(&script).await?);
        if !outcome.ok {
            return Ok(ToolResult::error(format!(
                "{}: {}",
                outcome.error.unwrap_or_default(),
                selector
            )));
        }

        self.0.wait_for_load().await?;
        let location = page_location(self.0.as_ref()).await;
        Ok(ToolResult::success(format!(
            "Clicked {:?}. Current page: {}",
            outcome.text.unwrap_or_default(),
            location
        )))
    }
}

struct InputText(Arc<dyn PageDriver>);

#[async_trait]
impl Tool for InputText {
    fn name(&self) -> &str {
        "input_text"
    }

    fn description(&self) -> &str {
        "Type text into an input or textarea matching a CSS selector, \
         optionally submitting its form."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required("selector", ParameterProperty::string("CSS selector of the field"))
            .with_required("text", ParameterProperty::string("Text to enter"))
            .with_property(
                "submit",
                ParameterProperty::boolean(
                    "Submit the surrounding form afterwards (default: false)",
                ),
            )
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let selector = required_str(args, "selector")?;
        let text = required_str(args, "text")?;
        let submit = args.get("submit").and_then(Value::as_bool).unwrap_or(false);

        let script = format!(
            r#"(() => {{
  const el = document.querySelector({sel});
  if (!el) return {{ ok: false, error: 'No element matches selector' }};
  el.focus();
  if ('value' in el) {{ el.value = {text}; }} else {{ el.textContent = {text}; }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  if ({submit}) {{
    if (el.form) {{ el.form.requestSubmit ? el.form.requestSubmit() : el.form.submit(); }}
    else {{ el.dispatchEvent(new KeyboardEvent('keydown', {{ key: 'Enter', bubbles: true }})); }}
  }}
  return {{ ok: true }};
}})()"#,
            sel = js_string(selector),
            text = js_string(text),
            submit = submit
        );

        let outcome = parse_outcome(self.0.evaluate(&script).await?);
        if !outcome.ok {
            return Ok(ToolResult::error(format!(
                "{}: {}",
                outcome.error.unwrap_or_default(),
                selector
            )));
        }

        if submit {
            self.0.wait_for_load().await?;
            let location = page_location(self.0.as_ref()).await;
            return Ok(ToolResult::success(format!("Submitted. Current page: {}", location)));
        }
        Ok(ToolResult::success(format!("Entered text into {}", selector)))
    }
}

#[derive(Debug, Deserialize)]
struct PageContent {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    text: String,
}

struct ExtractContent {
    page: Arc<dyn PageDriver>,
    max_chars: usize,
}

#[async_trait]
impl Tool for ExtractContent {
    fn name(&self) -> &str {
        "extract_content"
    }

    fn description(&self) -> &str {
        "Return the visible text of the current page with its title and URL."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let value = self
            .page
            .evaluate(
                "(() => ({ title: document.title, url: location.href, \
                 text: document.body ? document.body.innerText : '' }))()",
            )
            .await?;
        let content: PageContent = serde_json::from_value(value)?;

        let text = collapse_blank_lines(&content.text);
        let total = text.chars().count();
        let body: String = text.chars().take(self.max_chars).collect();
        debug!(url = %content.url, chars = total, "Extracted page content");

        let mut output = format!("Title: {}\nURL: {}\n\n{}", content.title, content.url, body);
        if total > self.max_chars {
            output.push_str(&format!(
                "\n\n[Content truncated: {} of {} characters]",
                self.max_chars, total
            ));
        }
        Ok(ToolResult::success(output))
    }
}

fn collapse_blank_lines(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct InteractiveElement {
    tag: String,
    #[serde(default)]
    text: String,
    selector: String,
    #[serde(default)]
    href: Option<String>,
}

struct ListInteractive(Arc<dyn PageDriver>);

#[async_trait]
impl Tool for ListInteractive {
    fn name(&self) -> &str {
        "list_interactive"
    }

    fn description(&self) -> &str {
        "List visible links, buttons and form fields with CSS selectors \
         usable by click_element and input_text."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let script = format!(
            r#"(() => {{
  const cssPath = (el) => {{
    const parts = [];
    while (el && el.nodeType === 1) {{
      if (el.id) {{ parts.unshift('#' + CSS.escape(el.id)); break; }}
      if (el === document.body) {{ parts.unshift('body'); break; }}
      let part = el.tagName.toLowerCase();
      const parent = el.parentElement;
      if (parent) {{
        const same = Array.from(parent.children).filter((c) => c.tagName === el.tagName);
        if (same.length > 1) part += ':nth-of-type(' + (same.indexOf(el) + 1) + ')';
      }}
      parts.unshift(part);
      el = parent;
    }}
    return parts.join(' > ');
  }};
  const visible = (el) => {{
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  }};
  const label = (el) =>
    el.innerText || el.value || el.getAttribute('aria-label') ||
    el.getAttribute('placeholder') || '';
  const query = 'a[href], button, input, textarea, select, [role="button"]';
  return Array.from(document.querySelectorAll(query))
    .filter(visible)
    .slice(0, {limit})
    .map((el) => ({{
      tag: el.tagName.toLowerCase(),
      text: label(el).trim().slice(0, 80),
      selector: cssPath(el),
      href: el.getAttribute('href'),
    }}));
}})()"#,
            limit = MAX_INTERACTIVE
        );

        let elements: Vec<InteractiveElement> =
            serde_json::from_value(self.0.evaluate(&script).await?)?;
        if elements.is_empty() {
            return Ok(ToolResult::success("No interactive elements found"));
        }

        Ok(ToolResult::success(format_elements(&elements)))
    }
}

fn format_elements(elements: &[InteractiveElement]) -> String {
    elements
        .iter()
        .enumerate()
        .map(|(i, el)| {
            let mut line = format!("[{}] <{}> {:?} selector: {}", i, el.tag, el.text, el.selector);
            if let Some(href) = &el.href {
                line.push_str(&format!(" href: {}", href));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

struct Scroll(Arc<dyn PageDriver>);

#[async_trait]
impl Tool for Scroll {
    fn name(&self) -> &str {
        "scroll"
    }

    fn description(&self) -> &str {
        "Scroll the page up or down by a number of viewport heights."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
            .with_required(
                "direction",
                ParameterProperty::string("Scroll direction").with_enum(&["up", "down"]),
            )
            .with_property(
                "pages",
                ParameterProperty::number("Viewport heights to scroll (default: 1)"),
            )
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        let sign = match required_str(args, "direction")? {
            "up" => -1.0,
            "down" => 1.0,
            other => return Ok(ToolResult::error(format!("Unknown direction: {}", other))),
        };
        let pages = args.get("pages").and_then(Value::as_f64).unwrap_or(1.0).clamp(0.1, 10.0);

        let script = format!(
            "(() => {{ window.scrollBy(0, {} * window.innerHeight); \
             return Math.round(window.scrollY); }})()",
            sign * pages
        );
        let offset = self.0.evaluate(&script).await?;
        Ok(ToolResult::success(format!("Scrolled; vertical offset is now {}", offset)))
    }
}

struct GoBack(Arc<dyn PageDriver>);

#[async_trait]
impl Tool for GoBack {
    fn name(&self) -> &str {
        "go_back"
    }

    fn description(&self) -> &str {
        "Go back to the previous page in history."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new()
    }

    async fn execute(&self, _args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        self.0.evaluate("history.back()").await?;
        self.0.wait_for_load().await?;
        let location = page_location(self.0.as_ref()).await;
        Ok(ToolResult::success(format!("Went back. Current page: {}", location)))
    }
}

struct Done;

#[async_trait]
impl Tool for Done {
    fn name(&self) -> &str {
        "done"
    }

    fn description(&self) -> &str {
        "Finish the task and report the result to the user."
    }

    fn parameters_schema(&self) -> ParameterSchema {
        ParameterSchema::new().with_required(
            "result",
            ParameterProperty::string("Complete answer or summary of what was found"),
        )
    }

    async fn execute(&self, args: &Value, _ctx: &ToolContext) -> Result<ToolResult> {
        Ok(ToolResult::finish(required_str(args, "result")?))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Page double: records calls and answers evaluations from a queue
    #[derive(Default)]
    pub struct ScriptedPage {
        pub navigations: Mutex<Vec<String>>,
        pub scripts: Mutex<Vec<String>>,
        pub answers: Mutex<VecDeque<Value>>,
    }

    impl ScriptedPage {
        pub fn with_answers(answers: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl PageDriver for ScriptedPage {
        async fn navigate(&self, url: &str) -> Result<()> {
            self.navigations.lock().unwrap().push(url.to_string());
            Ok(())
        }

        async fn evaluate(&self, expression: &str) -> Result<Value> {
            self.scripts.lock().unwrap().push(expression.to_string());
            Ok(self.answers.lock().unwrap().pop_front().unwrap_or(Value::Null))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::default()
    }

    #[test]
    fn test_js_string_escapes() {
        assert_eq!(js_string("a'b\"c"), r#""a'b\"c""#);
        assert_eq!(js_string("line\nbreak"), r#""line\nbreak""#);
    }

    #[test]
    fn test_registry_contents() {
        let registry = browser_registry(ScriptedPage::with_answers(vec![]), 100);
        assert_eq!(
            registry.list_names(),
            vec![
                "click_element",
                "done",
                "extract_content",
                "go_back",
                "go_to_url",
                "input_text",
                "list_interactive",
                "scroll"
            ]
        );
    }

    #[tokio::test]
    async fn test_go_to_url_navigates() {
        let page = ScriptedPage::with_answers(vec![json!("Example Domain")]);
        let result = GoToUrl(page.clone())
            .execute(&json!({"url": "https://example.com"}), &ctx())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.contains("Example Domain"));
        assert_eq!(*page.navigations.lock().unwrap(), vec!["https://example.com/"]);
    }

    #[tokio::test]
    async fn test_go_to_url_rejects_other_schemes() {
        let page = ScriptedPage::with_answers(vec![]);
        let tool = GoToUrl(page.clone());

        let result = tool.execute(&json!({"url": "file:///etc/passwd"}), &ctx()).await.unwrap();
        assert!(!result.success);
        let result = tool.execute(&json!({"url": "not a url"}), &ctx()).await.unwrap();
        assert!(!result.success);
        assert!(page.navigations.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_click_missing_element() {
        let page = ScriptedPage::with_answers(vec![json!({
            "ok": false,
            "error": "No element matches selector"
        })]);
        let result = ClickElement(page.clone())
            .execute(&json!({"selector": "#nope"}), &ctx())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(result.error.unwrap().contains("#nope"));
        assert!(page.scripts.lock().unwrap()[0].contains(r##"document.querySelector("#nope")"##));
    }

    #[tokio::test]
    async fn test_click_reports_location() {
        let page = ScriptedPage::with_answers(vec![
            json!({"ok": true, "text": "Issues"}),
            json!("https://github.com/heyibad/tasker/issues"),
        ]);
        let result = ClickElement(page)
            .execute(&json!({"selector": "a.issues"}), &ctx())
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.output.contains("\"Issues\""));
        assert!(result.output.ends_with("https://github.com/heyibad/tasker/issues"));
    }

    #[tokio::test]
    async fn test_input_text_quotes_values() {
        let page = ScriptedPage::with_answers(vec![json!({"ok": true})]);
        let result = InputText(page.clone())
            .execute(&json!({"selector": "input[name='q']", "text": "rust \"agents\""}), &ctx())
            .await
            .unwrap();

        assert!(result.success);
        let script = page.scripts.lock().unwrap()[0].clone();
        assert!(script.contains(r#"el.value = "rust \"agents\"""#));
        assert!(script.contains("if (false)"));
    }

    #[tokio::test]
    async fn test_extract_content_truncates() {
        let page = ScriptedPage::with_answers(vec![json!({
            "title": "Tasker",
            "url": "https://github.com/heyibad/tasker",
            "text": "line one\n\n\nline two and more"
        })]);
        let tool = ExtractContent { page, max_chars: 12 };
        let result = tool.execute(&json!({}), &ctx()).await.unwrap();

        assert!(result
            .output
            .starts_with("Title: Tasker\nURL: https://github.com/heyibad/tasker\n\nline one\nlin"));
        assert!(result.output.contains("[Content truncated: 12 of 26 characters]"));
    }

    #[tokio::test]
    async fn test_list_interactive_formats() {
        let page = ScriptedPage::with_answers(vec![json!([
            {"tag": "a", "text": "Code", "selector": "#code-tab", "href": "/heyibad/tasker"},
            {"tag": "button", "text": "Star", "selector": "body > div > button", "href": null}
        ])]);
        let result = ListInteractive(page).execute(&json!({}), &ctx()).await.unwrap();

        assert_eq!(
            result.output,
            "[0] <a> \"Code\" selector: #code-tab href: /heyibad/tasker\n\
             [1] <button> \"Star\" selector: body > div > button"
        );
    }

    #[tokio::test]
    async fn test_scroll_direction() {
        let page = ScriptedPage::with_answers(vec![json!(800)]);
        let tool = Scroll(page.clone());
        let result = tool.execute(&json!({"direction": "down", "pages": 2}), &ctx()).await.unwrap();
        assert!(result.output.contains("800"));
        assert!(page.scripts.lock().unwrap()[0].contains("scrollBy(0, 2 * window.innerHeight)"));

        let result = tool.execute(&json!({"direction": "sideways"}), &ctx()).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_done_is_final() {
        let result = Done
            .execute(&json!({"result": "Tasker is a to-do app."}), &ctx())
            .await
            .unwrap();
        assert!(result.is_final);
        assert_eq!(result.output, "Tasker is a to-do app.");
        assert!(Done.execute(&json!({}), &ctx()).await.is_err());
    }
}
