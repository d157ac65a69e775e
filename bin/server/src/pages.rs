//! Server-rendered pages.
//!
//! Each page is a Leptos component rendered to a complete HTML document.
//! Charts and tables are drawn client-side from the JSON API.

use axum::response::Html;
use gist_analytics_platform_access::{AuthenticatedUser, AuthorizationDecision, Recovery};
use leptos::prelude::*;

/// Renders `body` inside the shared document shell.
fn render<F, V>(title: &'static str, body: F) -> Html<String>
where
    F: FnOnce() -> V,
    V: IntoView + 'static,
{
    let owner = Owner::new();
    let html = owner.with(|| {
        view! {
            <!DOCTYPE html>
            <html lang="en">
                <head>
                    <meta charset="utf-8"/>
                    <meta name="viewport" content="width=device-width, initial-scale=1"/>
                    <title>{title}</title>
                </head>
                <body>{body()}</body>
            </html>
        }
        .to_html()
    });
    Html(html)
}

/// Login page - links to the Keycloak redirect.
#[component]
pub fn LoginPage() -> impl IntoView {
    view! {
        <div class="login-page">
            <div class="login-box">
                <h1>"Gist Analytics"</h1>
                <p>"Sign in with your organization account to view the dashboard."</p>
                <a href="/auth/login" class="login-button">"Log in with Keycloak"</a>
            </div>
        </div>
    }
}

/// Shown when a signed-in user lacks the required role.
#[component]
pub fn DeniedPage(required_role: String, roles: Vec<String>) -> impl IntoView {
    let held = if roles.is_empty() {
        view! { <p>"Your account has no roles."</p> }.into_any()
    } else {
        view! {
            <p>"Your roles:"</p>
            <ul>{roles.into_iter().map(|role| view! { <li>{role}</li> }).collect_view()}</ul>
        }
        .into_any()
    };

    view! {
        <div class="denied-page">
            <h1>"Access denied"</h1>
            <p>"This dashboard requires the " <code>{required_role}</code> " role."</p>
            {held}
            <a href="/auth/logout">"Log out"</a>
        </div>
    }
}

/// Shown when a login step fails.
#[component]
pub fn FailurePage(message: String, recovery: Recovery) -> impl IntoView {
    let action = match recovery {
        Recovery::RestartLogin => view! { <a href="/auth/login">"Log in again"</a> }.into_any(),
        Recovery::TryAgain => view! { <a href="/auth/login">"Try again"</a> }.into_any(),
        Recovery::ContactAdministrator => {
            view! { <p>"Please contact your administrator."</p> }.into_any()
        }
    };

    view! {
        <div class="failure-page">
            <h1>"Sign-in failed"</h1>
            <p>{message}</p>
            {action}
        </div>
    }
}

/// Landing page for authorized users.
#[component]
pub fn DashboardPage(name: String, roles: Vec<String>) -> impl IntoView {
    view! {
        <div class="dashboard">
            <header>
                <h1>"Gist Analytics"</h1>
                <span class="user">{name}</span>
                <a href="/auth/logout">"Log out"</a>
            </header>
            <p class="roles">"Roles: " {roles.join(", ")}</p>
            <nav>
                <a href="/api/turns">"Turns"</a>
                <a href="/api/metrics/daily">"Daily volume"</a>
                <a href="/api/metrics/distributions">"Distributions"</a>
                <a href="/api/metrics/trends">"Weekly trends"</a>
            </nav>
        </div>
    }
}

pub fn login() -> Html<String> {
    render("Log in · Gist Analytics", || view! { <LoginPage/> })
}

pub fn denied(decision: &AuthorizationDecision) -> Html<String> {
    let required_role = decision.required_role().to_string();
    let roles: Vec<String> = decision.roles().iter().map(str::to_string).collect();
    render("Access denied · Gist Analytics", move || {
        view! { <DeniedPage required_role roles/> }
    })
}

pub fn failure(message: &str, recovery: Recovery) -> Html<String> {
    let message = message.to_string();
    render("Sign-in failed · Gist Analytics", move || {
        view! { <FailurePage message recovery/> }
    })
}

pub fn dashboard(user: &AuthenticatedUser) -> Html<String> {
    let name = user.identity().label().to_string();
    let roles: Vec<String> = user.roles().iter().map(str::to_string).collect();
    render("Gist Analytics", move || view! { <DashboardPage name roles/> })
}
