//! 各模式的提示词模板
//!
//! 首行只描述角色与主题，回复格式要求放在后面。

pub fn plan_decompose(goal: &str, max: usize) -> String {
    format!(
        "You are planning how to achieve the goal \"{goal}\".\n\
         Break it into at most {max} ordered sub-goals.\n\
         Reply with one sub-goal per line as a numbered list and nothing else."
    )
}

pub fn plan_expand(goal: &str, sub_goal: &str, index: usize, total: usize) -> String {
    format!(
        "You are turning sub-goal {index} of {total} into concrete actions.\n\
         Overall goal: {goal}\n\
         Sub-goal: {sub_goal}\n\
         List the concrete actions, owners and checks needed to complete this sub-goal."
    )
}

pub fn plan_synthesis(goal: &str, steps: &str) -> String {
    format!(
        "You are consolidating a finished plan into its final form.\n\
         Goal: {goal}\n\
         Sub-goals and actions:\n{steps}\n\
         Write a concise executive summary of the plan, covering sequencing, dependencies and risks."
    )
}

pub fn explore_question(goal: &str, question: &str, visited: &[String]) -> String {
    let visited = if visited.is_empty() {
        "(none)".to_string()
    } else {
        visited.join("; ")
    };
    format!(
        "You are exploring the topic \"{goal}\" breadth-first.\n\
         Current question: {question}\n\
         Already explored: {visited}\n\
         Answer the current question concisely, then list up to three new follow-up \
         questions, one per line, each ending with a question mark."
    )
}

pub fn explore_synthesis(goal: &str, findings: &str, open: &[String]) -> String {
    let open = if open.is_empty() {
        "(none)".to_string()
    } else {
        open.join("; ")
    };
    format!(
        "You are summarizing a breadth-first exploration of \"{goal}\".\n\
         Findings:\n{findings}\n\
         Unanswered questions: {open}\n\
         Write a structured overview that connects the findings and names the most important gaps."
    )
}

pub fn write_elaboration(goal: &str) -> String {
    format!(
        "You are preparing to write a document about \"{goal}\".\n\
         Describe the intended audience, scope, key themes and tone in one short brief."
    )
}

pub fn write_outline(goal: &str, brief: &str, max: usize) -> String {
    format!(
        "You are outlining a document about \"{goal}\".\n\
         Writing brief:\n{brief}\n\
         Produce at most {max} section titles in reading order.\n\
         Reply with one title per line and nothing else."
    )
}

pub fn write_section(
    goal: &str,
    brief: &str,
    outline: &[String],
    title: &str,
    previous: Option<&str>,
) -> String {
    let previous = previous
        .map(|p| format!("\nThe previous section ended with:\n{p}\n"))
        .unwrap_or_default();
    format!(
        "You are writing the section \"{title}\" of a document.\n\
         Document topic: {goal}\n\
         Writing brief: {brief}\n\
         Outline: {}\n{previous}\
         Write the full section body in markdown, grounded in the provided context. \
         Do not repeat the section title.",
        outline.join(" | ")
    )
}

pub fn write_refine(goal: &str, title: &str, draft: &str) -> String {
    format!(
        "You are editing the section \"{title}\" of a document.\n\
         Document topic: {goal}\n\
         Draft:\n{draft}\n\
         Tighten the prose, fix factual or logical gaps and keep the markdown structure. \
         Reply with the revised section body only."
    )
}

pub fn research_questions(goal: &str, max: usize) -> String {
    format!(
        "You are scoping a research task on \"{goal}\".\n\
         Derive at most {max} precise research questions that together answer the goal.\n\
         Reply with one question per line and nothing else."
    )
}

pub fn research_extract(goal: &str, question: &str) -> String {
    format!(
        "You are extracting evidence for a research report.\n\
         Research goal: {goal}\n\
         Question: {question}\n\
         Using only the provided context, list the key facts that answer the question \
         and note which source each fact comes from."
    )
}

pub fn research_synthesis(goal: &str, evidence: &str) -> String {
    format!(
        "You are writing the final research report.\n\
         Research goal: {goal}\n\
         Collected evidence:\n{evidence}\n\
         Synthesize a structured markdown report with an executive summary, findings and open questions."
    )
}

pub fn debate_positions(goal: &str) -> String {
    format!(
        "You are setting up a debate on the motion \"{goal}\".\n\
         State two to four clearly opposing positions.\n\
         Reply with one position per line and nothing else."
    )
}

pub fn debate_rules(goal: &str, positions: &[String], round: usize, transcript: &str) -> String {
    format!(
        "You are the judge opening round {round} of a debate.\n\
         Motion: {goal}\n\
         Positions: {}\n\
         Transcript so far:\n{transcript}\n\
         State the focus and rules for this round in two or three sentences.",
        positions.join(" | ")
    )
}

pub fn debate_argument(
    goal: &str,
    position: &str,
    round: usize,
    rules: &str,
    transcript: &str,
) -> String {
    format!(
        "You are arguing in round {round} of a debate.\n\
         Motion: {goal}\n\
         Your position: {position}\n\
         Round rules: {rules}\n\
         Transcript so far:\n{transcript}\n\
         Make your strongest argument for this round and rebut the other side."
    )
}

pub fn debate_judge(goal: &str, positions: &[String], arguments: &[String]) -> String {
    let mut body = String::new();
    for (i, (position, argument)) in positions.iter().zip(arguments).enumerate() {
        body.push_str(&format!("Position {} ({position}):\n{argument}\n\n", i + 1));
    }
    format!(
        "You are the impartial judge of a debate round.\n\
         Motion: {goal}\n\n{body}\
         Score each position from 0 to 10 for this round, one line each, formatted exactly \
         as `Position <n>: <score>`, followed by a one-paragraph justification."
    )
}

pub fn debate_verdict(goal: &str, standings: &str, transcript: &str) -> String {
    format!(
        "You are delivering the final verdict of a debate.\n\
         Motion: {goal}\n\
         Cumulative scores: {standings}\n\
         Transcript:\n{transcript}\n\
         Name the winning position and justify the decision."
    )
}
