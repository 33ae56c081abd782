use armature_csrf::prelude::*;
use armature_csrf::MemorySessionStore;
use http::Method;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct ProfilePage {
    csrf: CsrfGuard,
}

impl ProfilePage {
    fn render(&self, session: Arc<dyn SessionAdapter>) -> Result<String> {
        let binding = self.csrf.binding(Some(session));
        Ok(format!(
            r#"
<form method="POST" action="/profile">
    {}
    <input type="email" name="email" placeholder="Email" />
    <button type="submit">Save</button>
</form>
<form method="POST" action="/logout">
    {}
    <button type="submit">Log out</button>
</form>
            "#,
            binding.hidden_input()?,
            binding.hidden_input()?
        ))
    }

    fn submit(&self, request: &CsrfRequest) -> u16 {
        match self.csrf.require_valid_csrf(request) {
            Ok(()) => 200,
            Err(e) => e.status_code(),
        }
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("armature_csrf=debug")),
        )
        .init();

    println!("🔒 Armature CSRF Form Flow");
    println!("==========================\n");

    let page = ProfilePage {
        csrf: CsrfGuard::new(CsrfConfig::from_env()?)?,
    };
    println!("Active policy: {}\n", page.csrf.selector().name());

    let store = MemorySessionStore::new();
    let session: Arc<dyn SessionAdapter> = Arc::new(store.create());

    println!("GET /profile");
    println!("{}", page.render(session.clone())?);

    let token = page.csrf.binding(Some(session.clone())).get_csrf_token()?;

    let honest = CsrfRequest::new(Method::POST, "/profile")
        .with_body(format!("email=user%40example.com&csrf_token={}", token))
        .with_session(session.clone());
    println!("POST /profile with page token   → {}", page.submit(&honest));

    let forged = CsrfRequest::new(Method::POST, "/profile")
        .with_body("email=attacker%40example.com")
        .with_session(session.clone());
    println!("POST /profile without token     → {}", page.submit(&forged));

    let other: Arc<dyn SessionAdapter> = Arc::new(store.create());
    let replayed = CsrfRequest::new(Method::POST, "/profile")
        .with_body(format!("csrf_token={}", token))
        .with_session(other);
    println!("POST /profile from other session → {}", page.submit(&replayed));

    page.csrf.selector().rotate(Some(&*session))?;
    println!("POST /profile after rotation    → {}", page.submit(&honest));

    Ok(())
}
