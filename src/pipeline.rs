//! Query Pipeline
//!
//! Orchestrates one question through the governed path: pre-flight
//! validation, conversation context, intent classification, table
//! selection, context assembly, SQL generation, extraction, and safety
//! validation. Execution happens outside; the caller records the executed
//! turn and may ask for chart recommendations afterwards.

use crate::chart::{ChartAdvisor, ChartRecommendation};
use crate::context::{assemble_context, PromptContext};
use crate::conversation::{ConversationContext, ConversationStore, ConversationTurn, TurnRecord};
use crate::error::{InsightsError, Result};
use crate::execution::ExecutionResult;
use crate::extract::extract_sql;
use crate::field_guide::FieldGuide;
use crate::intent::{classify_intent, DomainRelevance, IntentAnalysis};
use crate::llm::{GeneratorIdentity, TextGenerator};
use crate::preflight::validate_question;
use crate::rules::BusinessRules;
use crate::schema::SchemaCatalog;
use crate::tables::select_tables;
use crate::validator::{extract_tables, SqlSafetyValidator};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

const SQL_MAX_TOKENS: u32 = 600;
const DEFAULT_SESSION: &str = "default";

lazy_static! {
    static ref RE_Q_LAB: Regex = Regex::new(r"(?i)\blabs?\b").unwrap();
    static ref RE_SQL_LAB_ID: Regex = Regex::new(r"(?i)\blab_id\b").unwrap();
    static ref RE_Q_COLLECTION: Regex =
        Regex::new(r"(?i)collect(ed|ion)|sample_collection_date").unwrap();
    static ref RE_SQL_TESTED: Regex = Regex::new(r"(?i)\bsample_tested_datetime\b").unwrap();
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub sql: String,
    pub intent: String,
    pub intent_details: Vec<String>,
    pub intent_analysis: IntentAnalysis,
    pub tables_selected: Vec<String>,
    pub tables_used: Vec<String>,
    pub context: PromptContext,
    pub conversation_context: ConversationContext,
    pub concerns: Vec<String>,
    pub processing_time_ms: u64,
}

pub struct QueryPipeline {
    rules: Arc<BusinessRules>,
    guide: Arc<FieldGuide>,
    schema: Arc<SchemaCatalog>,
    generator: Arc<dyn TextGenerator>,
    validator: SqlSafetyValidator,
    conversations: ConversationStore,
    charts: ChartAdvisor,
}

impl QueryPipeline {
    pub fn new(
        rules: Arc<BusinessRules>,
        guide: Arc<FieldGuide>,
        schema: Arc<SchemaCatalog>,
        generator: Arc<dyn TextGenerator>,
    ) -> Result<Self> {
        let validator = SqlSafetyValidator::new(&rules, &schema)?;
        let charts = ChartAdvisor::new(generator.clone());
        Ok(Self {
            rules,
            guide,
            schema,
            generator,
            validator,
            conversations: ConversationStore::default(),
            charts,
        })
    }

    pub fn generator_identity(&self) -> GeneratorIdentity {
        self.generator.identity()
    }

    /// Run one question through to validated SQL. Terminal failures carry
    /// the governance error; nothing is recorded in the conversation until
    /// the caller reports the executed result.
    pub async fn process_query(
        &self,
        question: &str,
        session: Option<&str>,
    ) -> Result<QueryOutcome> {
        let started = Instant::now();
        let session = session.unwrap_or(DEFAULT_SESSION);
        info!(%session, "processing question");

        validate_question(question, &self.rules)?;

        let conversation = self.conversations.context_for_new_query(session, question);

        let analysis = classify_intent(
            self.generator.as_ref(),
            &self.rules,
            &self.guide,
            question,
            &conversation,
        )
        .await?;

        if analysis.domain_relevance == DomainRelevance::Low {
            return Err(InsightsError::UnrelatedDomain(
                "low domain relevance".to_string(),
            ));
        }

        let tables = select_tables(question, &self.guide, &self.rules, &self.schema, &conversation);
        debug!(?tables, "selected candidate tables");

        let context = assemble_context(
            &self.rules,
            &self.guide,
            &self.schema,
            &analysis,
            &tables,
            &conversation,
        );

        let prompt = build_sql_prompt(&context, &conversation, question);
        let raw = self.generator.generate_sql(&prompt, SQL_MAX_TOKENS).await?;

        let sql = extract_sql(&raw)?;
        self.validator.validate(&sql)?;

        let concerns = domain_hints(question, &sql);
        let tables_used = extract_tables(&sql);
        info!(sql = %sql, "generated and validated SQL");

        Ok(QueryOutcome {
            sql,
            intent: analysis.primary_intent().as_str().to_string(),
            intent_details: analysis.intent_names(),
            intent_analysis: analysis,
            tables_selected: tables,
            tables_used,
            context,
            conversation_context: conversation,
            concerns,
            processing_time_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Record a completed turn after the caller has executed the SQL. A
    /// missing execution result still records the turn with query data only.
    pub fn record_result(
        &self,
        session: Option<&str>,
        question: &str,
        outcome: &QueryOutcome,
        result: Option<&ExecutionResult>,
    ) {
        let session = session.unwrap_or(DEFAULT_SESSION);
        self.conversations.add_query(
            session,
            TurnRecord {
                question,
                sql: &outcome.sql,
                intent: &outcome.intent,
                intent_details: &outcome.intent_details,
                tables_used: &outcome.tables_used,
            },
            result,
        );
    }

    /// Chart recommendations for an executed result. Failures here never
    /// invalidate the query result: the worst case is no recommendation.
    pub async fn suggest_chart(
        &self,
        result: &ExecutionResult,
        intent: &str,
        question: &str,
    ) -> Option<ChartRecommendation> {
        self.charts.suggest(result, intent, question).await
    }

    pub fn clear_history(&self, session: Option<&str>) {
        self.conversations
            .clear_history(session.unwrap_or(DEFAULT_SESSION));
    }

    pub fn get_history(&self, session: Option<&str>) -> Vec<ConversationTurn> {
        self.conversations
            .history(session.unwrap_or(DEFAULT_SESSION))
    }

    pub fn get_history_item(
        &self,
        session: Option<&str>,
        index: usize,
    ) -> Option<ConversationTurn> {
        self.conversations
            .history_item(session.unwrap_or(DEFAULT_SESSION), index)
    }

    pub fn rewind(&self, session: Option<&str>, index: usize) {
        self.conversations
            .rewind(session.unwrap_or(DEFAULT_SESSION), index);
    }
}

fn build_sql_prompt(
    context: &PromptContext,
    conversation: &ConversationContext,
    question: &str,
) -> String {
    let mut prompt = String::from(
        "You are a MySQL and medical database SQL expert for a laboratory data warehouse.\n\
         Generate ONE valid MySQL SELECT statement answering the question, using only the\n\
         tables and columns listed below. Return only the SQL statement in a ```sql block.\n\n",
    );
    prompt.push_str(&context.render());

    if conversation.has_context && !conversation.llm_context_block.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&conversation.llm_context_block);
    }

    prompt.push_str(&format!("\n\nUSER QUESTION: {}\n", question));
    prompt
}

/// Soft domain hints surfaced as concerns; they never block a query.
fn domain_hints(question: &str, sql: &str) -> Vec<String> {
    let mut concerns = Vec::new();
    if RE_Q_LAB.is_match(question) && !RE_SQL_LAB_ID.is_match(sql) {
        concerns.push("Hint: expected lab_id JOIN for 'by lab'.".to_string());
    }
    if !RE_Q_COLLECTION.is_match(question) && !RE_SQL_TESTED.is_match(sql) {
        concerns.push("Hint: prefer sample_tested_datetime for time filters.".to_string());
    }
    concerns
}
