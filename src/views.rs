use std::fmt::{self, Write};

use crate::models::Todo;

const STYLE: &str = r#"
    body { margin: 0; padding: 32px; font-family: system-ui, sans-serif; background: #f4f5f7; }
    main { max-width: 720px; margin: 0 auto; background: #fff; border-radius: 12px; padding: 24px; }
    h1 { margin-top: 0; }
    form { display: flex; gap: 8px; margin-bottom: 24px; }
    form input[type="text"] { flex: 1; padding: 8px 10px; border: 1px solid #d0d5dd; border-radius: 8px; }
    button { border: none; border-radius: 8px; padding: 8px 12px; cursor: pointer; }
    ul { list-style: none; padding: 0; display: grid; gap: 8px; }
    li { display: flex; justify-content: space-between; align-items: center; padding: 10px 14px; background: #f8fafc; border-radius: 8px; }
    li.done .title { text-decoration: line-through; color: #64748b; }
    .meta { display: flex; flex-direction: column; gap: 2px; }
    .description, .time { font-size: 13px; color: #64748b; }
    .delete { background: #fee2e2; color: #991b1b; }
"#;

const SCRIPT: &str = r#"
    async function send(method, url, body) {
      const res = await fetch(url, {
        method,
        headers: { "Content-Type": "application/json" },
        body: body === undefined ? undefined : JSON.stringify(body),
      });
      if (!res.ok) { alert(await res.text()); return; }
      location.reload();
    }
    document.getElementById("new-todo").addEventListener("submit", (event) => {
      event.preventDefault();
      const form = event.target;
      send("POST", "/todos", {
        title: form.title.value,
        description: form.description.value || null,
        completed: false,
      });
    });
    document.querySelectorAll("li[data-id]").forEach((item) => {
      const id = item.dataset.id;
      item.querySelector(".toggle").addEventListener("click", () => send("PUT", `/todos/${id}`, {
        title: item.dataset.title,
        description: item.dataset.description || null,
        completed: item.dataset.completed !== "true",
      }));
      item.querySelector(".delete").addEventListener("click", () => send("DELETE", `/todos/${id}`));
    });
"#;

/// Server-rendered listing of every todo, in the order the store yields them.
#[derive(Debug, Clone)]
pub struct HomePage {
    title: String,
}

impl HomePage {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
        }
    }

    pub fn render(&self, todos: &[Todo]) -> Result<String, fmt::Error> {
        let mut page = String::new();
        self.write_page(&mut page, todos)?;
        Ok(page)
    }

    fn write_page<W: Write>(&self, out: &mut W, todos: &[Todo]) -> fmt::Result {
        let title = html_escape(&self.title);
        write!(
            out,
            r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>{title}</title>
  <style>{STYLE}</style>
</head>
<body>
<main>
  <h1>{title}</h1>
  <form id="new-todo">
    <input type="text" name="title" placeholder="New todo" required />
    <input type="text" name="description" placeholder="Description" />
    <button type="submit">Add</button>
  </form>
"#
        )?;

        if todos.is_empty() {
            out.write_str("  <p class=\"empty\">Nothing to do yet.</p>\n")?;
        } else {
            out.write_str("  <ul>\n")?;
            for todo in todos {
                write_item(out, todo)?;
            }
            out.write_str("  </ul>\n")?;
        }

        write!(out, "</main>\n<script>{SCRIPT}</script>\n</body>\n</html>\n")
    }
}

fn write_item<W: Write>(out: &mut W, todo: &Todo) -> fmt::Result {
    let title = html_escape(&todo.title);
    let description = todo.description.as_deref().map(html_escape).unwrap_or_default();
    write!(
        out,
        r#"    <li data-id="{id}" data-title="{title}" data-description="{description}" data-completed="{completed}"{class}>
      <div class="meta">
        <span class="title">{title}</span>
"#,
        id = todo.id,
        completed = todo.completed,
        class = if todo.completed { r#" class="done""# } else { "" },
    )?;
    if !description.is_empty() {
        writeln!(out, r#"        <span class="description">{description}</span>"#)?;
    }
    write!(
        out,
        r#"        <span class="time">Created {created}</span>
      </div>
      <div class="actions">
        <button class="toggle">{toggle}</button>
        <button class="delete">Delete</button>
      </div>
    </li>
"#,
        created = todo.created_at.format("%Y-%m-%d %H:%M"),
        toggle = if todo.completed { "Reopen" } else { "Done" },
    )
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
