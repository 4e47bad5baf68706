use std::borrow::Cow;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::audio::read_wav;
use crate::{check_text, NarrateError, SynthesisEngine, SynthesisError, SynthesisResult, VoiceProfile};

/// Languages the multilingual voice-cloning model accepts.
pub const DEFAULT_LANGUAGES: &[&str] = &[
    "en", "es", "fr", "de", "it", "pt", "pl", "tr", "ru", "nl", "cs", "ar", "zh-cn", "ja", "hu",
    "ko",
];

/// Argument template used by [`CommandEngine::new`].
pub const DEFAULT_ARGS: &[&str] = &[
    "--reference",
    "{reference}",
    "--output",
    "{output}",
    "--language",
    "{language}",
    "--temperature",
    "{temperature}",
    "--speed",
    "{speed}",
    "--repetition-penalty",
    "{repetition_penalty}",
];

const OOM_MARKERS: &[&str] = &["out of memory", "resource exhausted", "cannot allocate memory"];
const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "too many requests", "429"];

/// Parameters for "loading" a model into a command engine.
#[derive(Debug, Clone, Default)]
pub struct CommandModelParams {
    /// Appended to every invocation after the argument template.
    pub extra_args: Vec<String>,
}

/// Speech engine backed by an external TTS program.
///
/// The program receives the text on stdin and its arguments from a template
/// in which `{reference}`, `{output}`, `{language}`, `{temperature}`,
/// `{speed}`, `{repetition_penalty}` and `{model}` are substituted per call.
/// It must write a WAV file to `{output}` and exit with status 0.
///
/// ```rust,no_run
/// use narrate_rs::{engines::CommandEngine, SynthesisEngine};
/// use std::path::Path;
///
/// let mut engine = CommandEngine::new("xtts-cli")
///     .with_args(["--model-dir", "{model}", "--speaker-wav", "{reference}", "--out", "{output}"]);
/// engine.load_model(Path::new("models/xtts_v2"))?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct CommandEngine {
    program: PathBuf,
    args: Vec<String>,
    languages: Vec<String>,
    max_chars: usize,
    model_path: Option<PathBuf>,
    model_args: Vec<String>,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: DEFAULT_ARGS.iter().map(|a| a.to_string()).collect(),
            languages: DEFAULT_LANGUAGES.iter().map(|l| l.to_string()).collect(),
            max_chars: crate::HARD_CHAR_LIMIT,
            model_path: None,
            model_args: Vec::new(),
        }
    }

    /// Replace the argument template.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict accepted languages. An empty list accepts any language.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.model_path.is_some()
    }

    /// The argument list for one call.
    fn render_args(&self, voice: &VoiceProfile, output: &Path) -> Result<Vec<String>, SynthesisError> {
        let model = self.model_path.as_ref().map(|p| p.display().to_string());
        let mut rendered = Vec::with_capacity(self.args.len() + self.model_args.len());

        for arg in self.args.iter().chain(&self.model_args) {
            if arg.contains("{model}") && model.is_none() {
                return Err(SynthesisError::ModelNotLoaded);
            }
            let arg = arg
                .replace("{reference}", &voice.reference_audio.display().to_string())
                .replace("{output}", &output.display().to_string())
                .replace("{language}", &voice.language)
                .replace("{temperature}", &voice.temperature.to_string())
                .replace("{speed}", &voice.speed.to_string())
                .replace("{repetition_penalty}", &voice.repetition_penalty.to_string())
                .replace("{model}", model.as_deref().unwrap_or_default());
            rendered.push(arg);
        }
        Ok(rendered)
    }

    fn run(&self, text: &str, voice: &VoiceProfile, output: &Path) -> Result<(), SynthesisError> {
        if !self.languages.is_empty() && !self.languages.iter().any(|l| *l == voice.language) {
            return Err(SynthesisError::UnsupportedLanguage(voice.language.clone()));
        }
        let args = self.render_args(voice, output)?;
        log::debug!("Running {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SynthesisError::Engine(format!("{} not found", self.program.display()))
                } else {
                    SynthesisError::Io(e)
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(line_terminated(text).as_bytes())?;
        }

        let output_status = child.wait_with_output()?;
        if !output_status.status.success() {
            let stderr = String::from_utf8_lossy(&output_status.stderr);
            return Err(classify_failure(output_status.status.code(), &stderr));
        }
        if !output.is_file() {
            return Err(SynthesisError::MissingOutput(output.to_path_buf()));
        }
        Ok(())
    }
}

impl Drop for CommandEngine {
    fn drop(&mut self) {
        self.unload_model();
    }
}

impl SynthesisEngine for CommandEngine {
    type ModelParams = CommandModelParams;

    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> Result<(), SynthesisError> {
        if !model_path.exists() {
            return Err(SynthesisError::Engine(format!(
                "model path {} does not exist",
                model_path.display()
            )));
        }
        self.model_path = Some(model_path.to_path_buf());
        self.model_args = params.extra_args;
        Ok(())
    }

    fn unload_model(&mut self) {
        self.model_path = None;
        self.model_args.clear();
    }

    fn max_chars(&self) -> usize {
        self.max_chars
    }

    fn synthesize(&mut self, text: &str, voice: &VoiceProfile) -> Result<SynthesisResult, SynthesisError> {
        let scratch = tempfile::tempdir()?;
        let path = self.synthesize_to_file(text, voice, &scratch.path().join("out.wav"))?;
        read_wav(&path).map_err(|e| match e {
            NarrateError::Wav(e) => SynthesisError::Wav(e),
            NarrateError::Io(e) => SynthesisError::Io(e),
            other => SynthesisError::Engine(other.to_string()),
        })
    }

    /// The program writes straight to `output_path`; no samples pass through
    /// this process. Any file already at `output_path` is removed first, so a
    /// program that exits cleanly without writing is reported as missing output.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        voice: &VoiceProfile,
        output_path: &Path,
    ) -> Result<PathBuf, SynthesisError> {
        check_text(text, self.max_chars)?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::remove_file(output_path) {
            Ok(()) => log::debug!("Removed stale {}", output_path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.run(text, voice, output_path)?;
        Ok(output_path.to_path_buf())
    }
}

fn classify_failure(code: Option<i32>, stderr: &str) -> SynthesisError {
    let lower = stderr.to_lowercase();
    let detail = stderr.trim().lines().last().unwrap_or("").to_string();
    if OOM_MARKERS.iter().any(|m| lower.contains(m)) {
        SynthesisError::ResourceExhausted(detail)
    } else if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        SynthesisError::RateLimited(detail)
    } else {
        SynthesisError::Engine(format!("exited with code {code:?}: {}", stderr.trim()))
    }
}

// Line-oriented TTS front ends may drop a final token without a newline.
fn line_terminated(text: &str) -> Cow<'_, str> {
    if text.ends_with('\n') {
        Cow::Borrowed(text)
    } else {
        Cow::Owned(format!("{text}\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_failure, CommandEngine, CommandModelParams};
    use crate::voice::{Gender, VoiceProfile};
    use crate::{NarrationConfig, SynthesisEngine, SynthesisError};
    use std::path::Path;

    fn voice() -> VoiceProfile {
        VoiceProfile::from_config(
            "Narrator (Female)",
            Gender::Female,
            "ref/narrator.wav".into(),
            &NarrationConfig::default(),
        )
    }

    #[test]
    fn renders_placeholders() {
        let engine = CommandEngine::new("tts").with_args(["-r", "{reference}", "-o={output}", "{language}:{speed}"]);
        let args = engine.render_args(&voice(), Path::new("out/chunk_0001.wav")).unwrap();
        assert_eq!(args, vec!["-r", "ref/narrator.wav", "-o=out/chunk_0001.wav", "en:1"]);
    }

    #[test]
    fn model_placeholder_requires_a_loaded_model() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CommandEngine::new("tts").with_args(["--model", "{model}"]);
        assert!(matches!(
            engine.render_args(&voice(), Path::new("o.wav")),
            Err(SynthesisError::ModelNotLoaded)
        ));

        engine
            .load_model_with_params(
                dir.path(),
                CommandModelParams {
                    extra_args: vec!["--device".into(), "cuda".into()],
                },
            )
            .unwrap();
        let args = engine.render_args(&voice(), Path::new("o.wav")).unwrap();
        assert_eq!(args[1], dir.path().display().to_string());
        assert_eq!(&args[2..], ["--device", "cuda"]);

        engine.unload_model();
        assert!(!engine.is_loaded());
    }

    #[test]
    fn out_of_memory_is_transient() {
        let err = classify_failure(Some(1), "Traceback...\nRuntimeError: CUDA out of memory. Tried to allocate");
        assert!(matches!(err, SynthesisError::ResourceExhausted(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn rate_limit_is_transient() {
        let err = classify_failure(Some(1), "HTTP 429 Too Many Requests");
        assert!(matches!(err, SynthesisError::RateLimited(_)));
    }

    #[test]
    fn other_failures_are_permanent() {
        let err = classify_failure(Some(2), "invalid speaker file");
        assert!(!err.is_transient());
    }

    #[test]
    fn unsupported_language_is_rejected_before_spawning() {
        let mut engine = CommandEngine::new("/nonexistent/tts-program");
        let mut profile = voice();
        profile.language = "xx".into();
        assert!(matches!(
            engine.synthesize_to_file("Hello.", &profile, Path::new("o.wav")),
            Err(SynthesisError::UnsupportedLanguage(_))
        ));
    }

    #[test]
    fn missing_program_is_a_permanent_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = CommandEngine::new("/nonexistent/tts-program");
        let err = engine
            .synthesize_to_file("Hello.", &voice(), &dir.path().join("o.wav"))
            .unwrap_err();
        assert!(matches!(err, SynthesisError::Engine(_)));
    }

    #[test]
    fn oversized_text_is_rejected() {
        let mut engine = CommandEngine::new("tts").with_max_chars(10);
        assert!(matches!(
            engine.synthesize_to_file("eleven chars", &voice(), Path::new("o.wav")),
            Err(SynthesisError::TextTooLong { len: 12, max: 10 })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn runs_a_shell_program() {
        let dir = tempfile::tempdir().unwrap();
        let reference = dir.path().join("ref.wav");
        crate::SynthesisResult {
            samples: vec![0.1; 100],
            sample_rate: 16_000,
            channels: 1,
        }
        .write_wav(&reference)
        .unwrap();
        let mut profile = voice();
        profile.reference_audio = reference;

        let mut engine = CommandEngine::new("sh").with_args(["-c", "cat > /dev/null && cp {reference} {output}"]);
        let result = engine.synthesize("Hello there.", &profile).unwrap();
        assert_eq!(result.samples.len(), 100);
        assert_eq!(result.sample_rate, 16_000);
    }

    #[cfg(unix)]
    #[test]
    fn leftover_output_is_not_taken_as_fresh_audio() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("chunks").join("chunk_0003.wav");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"RIFF-partial-from-crash").unwrap();

        let mut engine = CommandEngine::new("sh").with_args(["-c", "cat > /dev/null"]);
        let err = engine.synthesize_to_file("Hello.", &voice(), &output).unwrap_err();
        assert!(matches!(err, SynthesisError::MissingOutput(_)));
        assert!(!output.exists());
    }
}
