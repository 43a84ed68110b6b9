use anyhow::{Context, Result};
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, REFERER};
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

use crate::config::QuizConfig;

/// 演習サイトとのやり取りのエラー
#[derive(Debug, Error)]
pub enum QuizError {
    /// ページ内にCSRFトークンの input が見つからない
    #[error("CSRF token not found on {page} page")]
    CsrfTokenNotFound { page: String },

    /// ログインに失敗した
    #[error("login failed with HTTP status {status}")]
    LoginFailed { status: u16 },

    /// 問題リクエストに失敗した
    #[error("question request failed with HTTP status {status}")]
    RequestFailed { status: u16 },
}

/// 多肢選択問題の選択肢
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizOption {
    /// 選択肢ラベル（A〜E）
    pub label: String,

    /// 選択肢本文
    pub text: String,
}

/// スクレイピングした1問
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizQuestion {
    /// 問題文
    pub text: String,

    /// 選択肢
    pub options: Vec<QuizOption>,
}

/// 演習サイトのクライアント
///
/// ログインセッションを維持するためCookieストアを有効にしている。
pub struct QuizClient {
    config: QuizConfig,
    client: reqwest::Client,
}

impl QuizClient {
    /// 新しいクライアントを作成
    pub fn new(config: QuizConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { config, client })
    }

    /// ログインして問題を1バッチ取得する
    pub async fn fetch_questions(&self) -> Result<Vec<QuizQuestion>> {
        // ログインページからCSRFトークンとセッションCookieを取得
        let login_page = self
            .client
            .get(&self.config.login_url)
            .send()
            .await
            .context("Failed to fetch the login page")?;

        let status = login_page.status();
        if !status.is_success() {
            return Err(QuizError::LoginFailed {
                status: status.as_u16(),
            }
            .into());
        }

        let login_html = login_page
            .text()
            .await
            .context("Failed to read the login page")?;
        let csrf_token = extract_csrf_token(&login_html, "login")?;

        debug!("Obtained login CSRF token");

        // ログインPOST
        let login_data = [
            ("email", self.config.email.as_str()),
            ("password", self.config.password.as_str()),
            ("_token", csrf_token.as_str()),
            ("remember", "on"),
        ];

        let login_response = self
            .client
            .post(&self.config.login_url)
            .headers(browser_headers(&self.config.login_url))
            .form(&login_data)
            .send()
            .await
            .context("Failed to send the login request")?;

        let status = login_response.status();
        if !status.is_success() {
            return Err(QuizError::LoginFailed {
                status: status.as_u16(),
            }
            .into());
        }

        info!("Logged in to {}", self.config.login_url);

        // 問題ページを開いて新しいCSRFトークンを取得
        // （問題リクエスト先URLの末尾の /practice を落とすと道場ページになる）
        let dojo_url = self.config.questions_url.trim_end_matches("/practice");

        let dojo_page = self
            .client
            .get(dojo_url)
            .send()
            .await
            .context("Failed to fetch the practice page")?;

        let status = dojo_page.status();
        if !status.is_success() {
            return Err(QuizError::RequestFailed {
                status: status.as_u16(),
            }
            .into());
        }

        let dojo_html = dojo_page
            .text()
            .await
            .context("Failed to read the practice page")?;
        let csrf_token = extract_csrf_token(&dojo_html, "practice")?;

        // 問題リクエストPOST
        let count = self.config.question_count.to_string();
        let subject_field = format!("subject[{}]", self.config.subject);
        let questions_data = [
            ("section", self.config.section.as_str()),
            (subject_field.as_str(), self.config.subject.as_str()),
            ("numberofquestions", count.as_str()),
            ("_token", csrf_token.as_str()),
        ];

        let questions_response = self
            .client
            .post(&self.config.questions_url)
            .headers(browser_headers(&self.config.questions_url))
            .form(&questions_data)
            .send()
            .await
            .context("Failed to send the question request")?;

        let status = questions_response.status();
        if !status.is_success() {
            return Err(QuizError::RequestFailed {
                status: status.as_u16(),
            }
            .into());
        }

        let questions_html = questions_response
            .text()
            .await
            .context("Failed to read the question page")?;

        let questions = parse_questions(&questions_html);
        info!("Scraped {} questions", questions.len());

        Ok(questions)
    }
}

/// サイトが普通のブラウザからのフォーム送信として扱うようにするヘッダー
fn browser_headers(referrer: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();

    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));

    if let Ok(value) = HeaderValue::from_str(referrer) {
        headers.insert(REFERER, value);
    }

    headers
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// 要素内のテキストを空白正規化して取り出す
fn element_text(element: ElementRef) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// ページからCSRFトークン（input[name="_token"]の値）を抜き出す
pub fn extract_csrf_token(html: &str, page: &str) -> Result<String, QuizError> {
    let document = Html::parse_document(html);
    let token_selector = selector(r#"input[name="_token"]"#);

    document
        .select(&token_selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|token| token.to_string())
        .ok_or_else(|| QuizError::CsrfTokenNotFound {
            page: page.to_string(),
        })
}

/// 問題ページのHTMLから問題と選択肢を抜き出す
///
/// 問題文のない問題ブロックはスキップし、ラベルか本文の欠けた選択肢は
/// その選択肢だけ落とす。バッチ全体は失敗させない。
pub fn parse_questions(html: &str) -> Vec<QuizQuestion> {
    let document = Html::parse_document(html);

    let question_selector = selector("div.row.question");
    let text_selector = selector("div.question2");
    let answer_selector = selector("div.question_answer");
    let label_selector = selector("div.abcde");
    let option_selector = selector("div.question-option");

    let mut questions = Vec::new();

    for block in document.select(&question_selector) {
        let text = match block.select(&text_selector).next() {
            Some(element) => element_text(element),
            None => {
                warn!("Question block without question text, skipping");
                continue;
            }
        };

        if text.is_empty() {
            warn!("Question block with empty question text, skipping");
            continue;
        }

        let mut options = Vec::new();
        for answer in block.select(&answer_selector) {
            let label = answer.select(&label_selector).next().map(element_text);
            let option_text = answer.select(&option_selector).next().map(element_text);

            match (label, option_text) {
                (Some(label), Some(option_text)) => {
                    options.push(QuizOption {
                        label,
                        text: option_text,
                    });
                }
                _ => {
                    warn!("Option without label or text, skipping");
                }
            }
        }

        questions.push(QuizQuestion { text, options });
    }

    questions
}

/// 問題リストをLaTeX文字列に整形する
pub fn format_latex(questions: &[QuizQuestion]) -> String {
    let mut latex = String::new();

    for (idx, question) in questions.iter().enumerate() {
        latex.push_str(&format!("\\textbf{{Question {}}}\n\n", idx + 1));
        latex.push_str(&format!("{}\n\n", question.text));

        for option in &question.options {
            latex.push_str(&format!("{}. {}\n\n", option.label, option.text));
        }

        latex.push('\n');
    }

    latex
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUESTION_PAGE: &str = r#"
        <html><body>
          <div class="row question">
            <div class="question2">What is 2 + 2?</div>
            <div class="question_answer">
              <div class="abcde">A</div>
              <div class="question-option">3</div>
            </div>
            <div class="question_answer">
              <div class="abcde">B</div>
              <div class="question-option">4</div>
            </div>
          </div>
          <div class="row question">
            <div class="question2">
              Evaluate the
              integral of x
            </div>
            <div class="question_answer">
              <div class="abcde">A</div>
              <div class="question-option">x^2/2 + C</div>
            </div>
          </div>
        </body></html>
    "#;

    #[test]
    fn extracts_csrf_token() {
        let html = r#"<form><input type="hidden" name="_token" value="tok123"></form>"#;
        assert_eq!(extract_csrf_token(html, "login").unwrap(), "tok123");
    }

    #[test]
    fn missing_csrf_token_is_an_error() {
        let err = extract_csrf_token("<html><body></body></html>", "login").unwrap_err();
        assert!(matches!(err, QuizError::CsrfTokenNotFound { .. }));
        assert_eq!(err.to_string(), "CSRF token not found on login page");
    }

    #[test]
    fn parses_questions_and_options() {
        let questions = parse_questions(QUESTION_PAGE);

        assert_eq!(questions.len(), 2);
        assert_eq!(questions[0].text, "What is 2 + 2?");
        assert_eq!(questions[0].options.len(), 2);
        assert_eq!(questions[0].options[1].label, "B");
        assert_eq!(questions[0].options[1].text, "4");

        // 複数行のテキストは空白1個に正規化される
        assert_eq!(questions[1].text, "Evaluate the integral of x");
    }

    #[test]
    fn block_without_question_text_is_skipped() {
        let html = r#"
            <div class="row question">
              <div class="question_answer">
                <div class="abcde">A</div>
                <div class="question-option">orphan option</div>
              </div>
            </div>
            <div class="row question">
              <div class="question2">Real question</div>
            </div>
        "#;

        let questions = parse_questions(html);
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].text, "Real question");
    }

    #[test]
    fn option_without_label_is_dropped() {
        let html = r#"
            <div class="row question">
              <div class="question2">Q</div>
              <div class="question_answer">
                <div class="question-option">no label</div>
              </div>
              <div class="question_answer">
                <div class="abcde">A</div>
                <div class="question-option">kept</div>
              </div>
            </div>
        "#;

        let questions = parse_questions(html);
        assert_eq!(questions[0].options.len(), 1);
        assert_eq!(questions[0].options[0].label, "A");
    }

    #[test]
    fn formats_latex_layout() {
        let questions = vec![QuizQuestion {
            text: "What is 2 + 2?".to_string(),
            options: vec![
                QuizOption {
                    label: "A".to_string(),
                    text: "3".to_string(),
                },
                QuizOption {
                    label: "B".to_string(),
                    text: "4".to_string(),
                },
            ],
        }];

        let latex = format_latex(&questions);
        assert_eq!(
            latex,
            "\\textbf{Question 1}\n\nWhat is 2 + 2?\n\nA. 3\n\nB. 4\n\n\n"
        );
    }

    #[test]
    fn no_questions_give_empty_latex() {
        assert_eq!(format_latex(&[]), "");
    }
}
