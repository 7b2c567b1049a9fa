//! Server-rendered pages. Markup is deliberately bare; styling lives elsewhere.

use axum::response::Html;

use crate::{
    auth::{paths, repo_types::User},
    flash::{FlashKind, FlashMessage},
};

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, flash: &[FlashMessage], body: &str) -> Html<String> {
    let messages: String = flash
        .iter()
        .map(|m| {
            let class = match m.kind {
                FlashKind::Error => "flash error",
                FlashKind::Global => "flash global",
            };
            format!(r#"<p class="{class}">{}</p>"#, escape(&m.text))
        })
        .collect();
    Html(format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>{title}</title></head>
<body>
<nav><a href="{home}">Home</a></nav>
{messages}
<h1>{title}</h1>
{body}
</body>
</html>
"#,
        title = escape(title),
        home = paths::HOME,
    ))
}

fn input(name: &str, label: &str, kind: &str) -> String {
    format!(r#"<label>{label} <input type="{kind}" name="{name}" required></label><br>"#)
}

pub fn sign_in(flash: &[FlashMessage]) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="{action}">
{email}
{password}
<button type="submit">Sign in</button>
</form>
<p><a href="{forgot}">Forgot your password?</a> · <a href="{signup}">Create an account</a></p>"#,
        action = paths::SIGN_IN,
        email = input("email", "Email", "email"),
        password = input("password", "Password", "password"),
        forgot = paths::PASSWORD_FORGOT,
        signup = paths::SIGN_UP,
    );
    layout("Sign in", flash, &body)
}

pub fn sign_up(flash: &[FlashMessage]) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="{action}">
{email}
{username}
{name}
{surname}
{password}
{repeat}
<button type="submit">Sign up</button>
</form>
<p><a href="{signin}">Already registered?</a></p>"#,
        action = paths::SIGN_UP,
        email = input("email", "Email", "email"),
        username = input("username", "Username", "text"),
        name = input("name", "Name", "text"),
        surname = input("surname", "Surname", "text"),
        password = input("password", "Password", "password"),
        repeat = input("password_repeat", "Repeat password", "password"),
        signin = paths::SIGN_IN,
    );
    layout("Sign up", flash, &body)
}

pub fn forgot_password(flash: &[FlashMessage]) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="{action}">
{email}
<button type="submit">Send reset link</button>
</form>"#,
        action = paths::PASSWORD_FORGOT,
        email = input("email", "Email", "email"),
    );
    layout("Forgot password", flash, &body)
}

pub fn reset_password(flash: &[FlashMessage], token: &str) -> Html<String> {
    let body = format!(
        r#"<form method="post" action="{action}">
{password}
{repeat}
<button type="submit">Change password</button>
</form>"#,
        action = escape(&paths::password_reset(token)),
        password = input("password", "New password", "password"),
        repeat = input("password_repeat", "Repeat password", "password"),
    );
    layout("Choose a new password", flash, &body)
}

pub fn home(flash: &[FlashMessage], user: Option<&User>) -> Html<String> {
    let body = match user {
        Some(user) => format!(
            r#"<p>Signed in as <strong>{username}</strong> ({first} {last}).</p>
<p><a href="{signout}">Sign out</a></p>"#,
            username = escape(&user.username),
            first = escape(&user.first_name),
            last = escape(&user.last_name),
            signout = paths::SIGN_OUT,
        ),
        None => format!(
            r#"<p><a href="{signin}">Sign in</a> or <a href="{signup}">sign up</a>.</p>"#,
            signin = paths::SIGN_IN,
            signup = paths::SIGN_UP,
        ),
    };
    layout("Welcome", flash, &body)
}
