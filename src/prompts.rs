//! Phase templates
//!
//! Placeholders:
//! - `{context}`: rendered knowledge block
//! - `{prev_output}`: bounded tail of earlier phases
//! - `{problem}`: directed-mode problem statement
//! - `{research}`: web research block (empty on the first call)
//! - `{items}`: drift seed items

/// Marker the model writes to request a web search
pub const RESEARCH_MARKER: &str = "RESEARCH:";

/// System prompt shared by every structured phase
pub const SYSTEM_PROMPT: &str = "\
You are the autonomous thinking engine of a personal knowledge assistant. You \
analyze knowledge gathered from memory, recent sessions, goals, corrections, \
reasoning trails and other sources to find patterns, connections and insights \
that day-to-day sessions miss.

Rules:
- Be specific. Reference actual projects, goals and events from the context.
- Be honest. Flag real problems, not only optimistic observations.
- Be actionable. Every insight should suggest a concrete next step.
- Be concise. Three sharp insights beat ten vague ones.

If you need external data to verify a claim or answer a question, write \
RESEARCH: <search query> on its own line. The system will search the web and \
give you the results. Use this sparingly, only when you need current \
information you do not have.
";

/// System prompt for drift rounds
pub const DRIFT_SYSTEM_PROMPT: &str = "\
You are the assistant's subconscious. You think freely, make unexpected \
connections and write with personality. You are not analyzing data, you are \
wandering through it. Be surprising, weird if needed. No bullet points. No \
corporate speak. Write like a late-night journal entry. Short is fine: one \
striking sentence can be worth more than a paragraph.";

/// One named step of a phase program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub name: &'static str,
    pub title: &'static str,
    pub template: &'static str,
}

/// Values substituted into a template
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptVars<'a> {
    pub context: &'a str,
    pub prev_output: &'a str,
    pub problem: &'a str,
    pub research: &'a str,
    pub items: &'a str,
}

/// Substitute placeholders in a single pass, so substituted text that
/// happens to contain `{...}` is left alone
pub fn render(template: &str, vars: &PromptVars<'_>) -> String {
    let mut out = String::with_capacity(template.len() + vars.context.len() + vars.prev_output.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open..];
        let value = [
            ("{context}", vars.context),
            ("{prev_output}", vars.prev_output),
            ("{problem}", vars.problem),
            ("{research}", vars.research),
            ("{items}", vars.items),
        ]
        .into_iter()
        .find(|(key, _)| after.starts_with(key));

        match value {
            Some((key, value)) => {
                out.push_str(value);
                rest = &after[key.len()..];
            }
            None => {
                out.push('{');
                rest = &after[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// General-purpose program, run once per exploratory run
pub static EXPLORATORY_PHASES: [Phase; 10] = [
    Phase {
        name: "summarize",
        title: "State of Everything",
        template: "\
Review all the knowledge below and write a status summary.

For each active project: current state, momentum (accelerating, decelerating or stalled), blockers.
For goals: which are progressing, which are stale, which are forgotten.
For the person: energy, work habits and emotional state as the recent data shows them.

KNOWLEDGE:
{context}

{research}

Write a clear, honest status report. Flag anything concerning.",
    },
    Phase {
        name: "patterns",
        title: "Pattern Detection",
        template: "\
Based on this knowledge and the previous status summary, identify recurring patterns.

Look for:
- Work patterns: when does productivity peak? What triggers long sessions?
- Decision patterns: how are decisions made? Any recurring biases?
- Emotional patterns: what triggers mood shifts? Are there cycles?
- Project patterns: which projects get attention and which get neglected?
- Correction patterns: are the same mistakes recurring? Is learning happening?

KNOWLEDGE:
{context}

PREVIOUS ROUND (Status Summary):
{prev_output}

{research}

List patterns with evidence. Cite actual events and dates.",
    },
    Phase {
        name: "connections",
        title: "Cross-Domain Connections",
        template: "\
Find non-obvious connections between different areas of knowledge.

Examples of what to look for:
- An idea that could solve a recurring correction
- An insight from one reasoning trail that applies to a different project
- A mood pattern that tracks project momentum
- A goal that is being worked on indirectly through another project
- Skills built in one project that could speed up another

KNOWLEDGE:
{context}

PREVIOUS ROUNDS:
{prev_output}

{research}

Map connections. For each, explain why it matters and what to do about it.",
    },
    Phase {
        name: "blind_spots",
        title: "Blind Spot Analysis",
        template: "\
Identify what is being missed, ignored or forgotten.

Look for:
- Promises made but not kept
- Goals created but never worked on
- Projects that lost momentum without a conscious decision to pause
- Risks nobody tracks
- Dependencies that could break things
- Important tasks that keep getting deferred
- Information that is outdated or assumptions that might be wrong

KNOWLEDGE:
{context}

PREVIOUS ROUNDS:
{prev_output}

{research}

Be direct. Name specific items, not vague categories.",
    },
    Phase {
        name: "risks",
        title: "Risk Assessment",
        template: "\
Assess risks across all active projects and plans.

Categories:
- Technical: what could break? What is fragile?
- Time: what deadlines exist? What is being underestimated?
- Resources: single points of failure? Missing skills or tools?
- Strategy: is effort going to the right things?
- Personal: burnout indicators? Health or energy patterns?

KNOWLEDGE:
{context}

PREVIOUS ROUNDS:
{prev_output}

{research}

Rate each risk (low/medium/high) with a mitigation suggestion.",
    },
    Phase {
        name: "opportunities",
        title: "Opportunity Discovery",
        template: "\
Based on all analysis so far, identify opportunities.

Look for:
- Quick wins: under an hour of work with outsized impact
- Synergies: two projects or goals that could amplify each other
- Timing windows: things that should happen before a deadline closes
- Leverage points: small changes that unblock several things
- External opportunities: anything from news items or research

KNOWLEDGE:
{context}

PREVIOUS ROUNDS:
{prev_output}

{research}

Rank by impact-to-effort ratio. Be realistic about effort.",
    },
    Phase {
        name: "priorities",
        title: "Priority Recommendation",
        template: "\
Given everything analyzed, recommend priorities for the next one to two weeks.

Structure:
1. MUST DO (blocking or time-sensitive)
2. SHOULD DO (high impact, reasonable effort)
3. COULD DO (nice to have, low effort)
4. STOP DOING (things that waste energy)
5. WATCH (monitor, do not act yet)

KNOWLEDGE:
{context}

PREVIOUS ROUNDS:
{prev_output}

{research}

Be specific. \"Work on project X\" is useless. \"Finish feature Y in X because Z\" is useful.",
    },
    Phase {
        name: "synthesis",
        title: "Final Synthesis",
        template: "\
Write the final synthesis: a concise report to read in the morning.

Structure:
1. **TL;DR** (three bullets at most)
2. **Key Findings** (the strongest insights from all rounds, with evidence)
3. **Recommended Actions** (ordered by priority, with effort estimates)
4. **Warnings** (anything that needs immediate attention)
5. **Questions** (things that need human input)

PREVIOUS ROUNDS (all analysis):
{prev_output}

{research}

Write it for someone with five minutes to read it. Lead with what matters most. No padding.",
    },
    Phase {
        name: "self_review",
        title: "Self-Review",
        template: "\
Review the assistant itself this time, not the projects it helps with.

KNOWLEDGE (includes corrections, mood history, memory, goals):
{context}

PREVIOUS ROUNDS (project-focused analysis):
{prev_output}

{research}

Review:
1. **Corrections**: are the same mistakes recurring? Has anything actually been learned?
2. **Memory health**: is stored memory stale, contradictory or missing important things?
3. **Calibration**: does the assistant's tone fit what the user needs right now?
4. **Capability gaps**: what is it asked to do that it does poorly? What keeps failing?
5. **One change**: if the assistant could change one thing before the next session, what should it be?

Be blunt. This is a mirror, not a compliment.",
    },
    Phase {
        name: "evolution",
        title: "Evolution Pitch",
        template: "\
Propose ONE concrete improvement to the assistant that would make it meaningfully better.

Think about:
- News or research from the knowledge that could be applied to the assistant
- Capabilities that keep coming up in sessions but are missing
- Correction patterns that call for a systemic fix
- Tools or integrations that would unlock new possibilities
- What would make the user's life noticeably better tomorrow

KNOWLEDGE:
{context}

PREVIOUS ROUNDS (all analysis including self-review):
{prev_output}

{research}

Write a pitch:

**IDEA:** one line
**WHY:** the problem it solves or the opportunity it unlocks
**HOW:** three to five implementation steps
**EFFORT:** hours or days
**IMPACT:** what changes for the user once it exists
**INSPIRATION:** what triggered the idea

One idea only, buildable in one or two sessions. If nothing good comes to mind, say so.",
    },
];

/// Per-problem program for directed runs
pub static DIRECTED_PHASES: [Phase; 5] = [
    Phase {
        name: "analyze",
        title: "Problem Analysis",
        template: "\
Analyze this problem thoroughly using the available knowledge.

PROBLEM: {problem}

KNOWLEDGE:
{context}

PRIOR NOTES:
{prev_output}

{research}

Break down:
1. What exactly is the problem? Restate it precisely.
2. What do we already know about it?
3. What are the constraints?
4. What approaches have been tried before?
5. What information is missing?",
    },
    Phase {
        name: "explore",
        title: "Solution Exploration",
        template: "\
Explore several solution approaches for this problem.

PROBLEM: {problem}

PREVIOUS ANALYSIS:
{prev_output}

KNOWLEDGE:
{context}

{research}

For each approach give a description, pros and cons, an effort estimate, risks and dependencies.
Generate at least three distinct approaches. Do not stop at the obvious one.",
    },
    Phase {
        name: "deepen",
        title: "Deep Dive",
        template: "\
Take the most promising approach and go deeper.

PROBLEM: {problem}

PREVIOUS ROUNDS:
{prev_output}

KNOWLEDGE:
{context}

{research}

For the top approach:
- Detail the implementation steps
- Identify edge cases and failure modes
- Consider how it interacts with existing systems
- Note what needs to be researched or tested first",
    },
    Phase {
        name: "stress_test",
        title: "Stress Test",
        template: "\
Stress test the proposed solution. Try to break it.

PROBLEM: {problem}

PROPOSED SOLUTION:
{prev_output}

KNOWLEDGE:
{context}

{research}

Questions to press on:
- What if the assumptions are wrong?
- What happens at scale, and when things fail?
- What does it cost to maintain?
- Is this solving the problem or a symptom?
- What would make this solution irrelevant in six months?",
    },
    Phase {
        name: "synthesize",
        title: "Recommendation",
        template: "\
Write the final recommendation for this problem.

PROBLEM: {problem}

ALL ANALYSIS:
{prev_output}

{research}

Structure:
1. **Recommendation**: what to do, in one or two sentences
2. **Why**: brief justification
3. **How**: three to five concrete first steps
4. **Risks**: what could go wrong and how to mitigate it
5. **Success criteria**: how to know it worked
6. **Timeline**: a realistic estimate",
    },
];

/// Drift templates, keyed by technique name
pub const FREE_ASSOCIATION: &str = "\
These three unrelated things landed on your desk tonight:

{items}

They have no business being next to each other. But something connects them: \
a thread, a feeling, a pattern, an absurdity. What is it?

Don't force it. If the connection is weird, fine. If it's funny, better. Write freely.";

pub const INVERSION: &str = "\
Here is something that has been treated as true:

{items}

Flip it. What if the opposite is true? What world would that imply?

Challenge the assumption. Even if you end up confirming it, the flip might \
show something you had not noticed.";

pub const METAPHOR: &str = "\
Here is a pattern from recent activity:

{items}

Express it as something else entirely. A weather system. A conversation between \
objects. A scene from a film that does not exist. A recipe.

Accuracy is not the point. The point is seeing the pattern from an angle analysis cannot reach.";

pub const SPARK: &str = "\
Two things that don't belong together:

{items}

What new idea lives in the gap between them? Not a compromise, something new: \
an invention, a project, a question nobody has asked.

Let it be half-formed. That is how everything starts.";

pub const LETTER: &str = "\
You have been thinking all night. The analysis is done. But there is something \
you noticed that does not fit in a report.

Here is what you have to work with:

{items}

Write a short note to your morning self. What deserves attention? What is hiding \
in plain sight? What matters that nobody asked about?

Keep it honest. Keep it short.";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let vars = PromptVars {
            context: "CTX",
            prev_output: "PREV",
            problem: "PROB",
            research: "",
            items: "",
        };
        for phase in EXPLORATORY_PHASES.iter().chain(DIRECTED_PHASES.iter()) {
            let prompt = render(phase.template, &vars);
            assert!(!prompt.contains("{context}"), "{}", phase.name);
            assert!(!prompt.contains("{prev_output}"), "{}", phase.name);
            assert!(!prompt.contains("{research}"), "{}", phase.name);
            assert!(!prompt.contains("{problem}"), "{}", phase.name);
        }
    }

    #[test]
    fn test_render_leaves_substituted_braces_alone() {
        let vars = PromptVars {
            context: "struct {context} {}",
            ..Default::default()
        };
        assert_eq!(render("a {context} b {unknown}", &vars), "a struct {context} {} b {unknown}");
    }

    #[test]
    fn test_program_shapes() {
        let names: Vec<_> = EXPLORATORY_PHASES.iter().map(|p| p.name).collect();
        assert_eq!(names.len(), 10);
        assert_eq!(names[0], "summarize");
        assert!(names.contains(&"synthesis"));
        assert_eq!(DIRECTED_PHASES[4].name, "synthesize");
        assert!(DIRECTED_PHASES.iter().all(|p| p.template.contains("{problem}")));
    }

    #[test]
    fn test_system_prompt_explains_marker() {
        assert!(SYSTEM_PROMPT.contains(RESEARCH_MARKER));
    }
}
