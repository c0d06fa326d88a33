use std::sync::LazyLock;

use regex::Regex;

use crate::error::StageError;
use crate::job::JobId;

/// Matches one `{{ ... }}` action.
static ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("valid regex"));

/// Expand a scene template for `job_id`.
///
/// The only supported action is `{{.}}`, which expands to the job ID. Any
/// other action is rejected so a template never ships half-rendered.
pub fn render_template(name: &str, source: &str, job_id: JobId) -> Result<String, StageError> {
    if let Some(action) = ACTION_RE
        .captures_iter(source)
        .find(|caps| &caps[1] != ".")
    {
        return Err(StageError::Template {
            name: name.to_string(),
            reason: format!("unsupported action `{}`", &action[0]),
        });
    }

    let id = job_id.to_string();
    Ok(ACTION_RE.replace_all(source, id.as_str()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_job_id() {
        let source = "mtllib job_{{.}}.mtl\no gopher\nusemtl badge_{{ . }}\n";
        let out = render_template("gopher.obj.tmpl", source, JobId(12)).unwrap();
        assert_eq!(out, "mtllib job_12.mtl\no gopher\nusemtl badge_12\n");
    }

    #[test]
    fn test_passes_through_plain_text() {
        let source = "newmtl Material\nmap_Kd k8s.png\n";
        assert_eq!(render_template("k8s.mtl.tmpl", source, JobId(1)).unwrap(), source);
    }

    #[test]
    fn test_rejects_other_actions() {
        let err = render_template("grpc.obj.tmpl", "o {{.Name}}\n", JobId(1)).unwrap_err();
        assert!(matches!(
            err,
            StageError::Template { ref name, ref reason }
                if name == "grpc.obj.tmpl" && reason.contains("{{.Name}}")
        ));
    }
}
