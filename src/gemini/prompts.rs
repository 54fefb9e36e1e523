//! Fixed instructions sent along with user input. All output is Brazilian Portuguese.

pub const CHAT_SYSTEM_INSTRUCTION: &str =
    "Você é um assistente prestativo. Responda sempre em Português Brasileiro.";

pub const LIVE_SYSTEM_INSTRUCTION: &str = "Você é um companheiro amigável. Fale naturalmente, seja prestativo e mantenha uma conversa leve em Português Brasileiro.";

/// Turns a product image or video into a TikTok Shop visual prompt plus
/// narration script.
pub const TIKTOK_ANALYSIS_PROMPT: &str = r#"Analise esta mídia e crie uma proposta original de prompt e roteiro focado em conversão para TikTok Shop.

REGRAS DE OURO (PROTEÇÃO E QUALIDADE):
1. EVITAR DIREITOS AUTORAIS: Se houver pessoas, crie uma versão similar mas única. Modifique levemente o modelo para ser original.
2. FALA NATURAL E ÚNICA: O roteiro deve ser inédito, modificando o tom e as palavras da fala original, mas mantendo a estrutura de conversão (Gancho, Escassez, Narração, CTA).
3. FIDELIDADE AO PRODUTO: O produto deve ser uma réplica 1:1, sem alterações de tamanho, cor ou especificações.
4. QUALIDADE TÉCNICA EXTREMA: O prompt deve instruir explicitamente o modelo de vídeo a remover todos os bugs visuais, garantir movimentos suaves e uma fala ultra-natural.

ESTRUTURA EM PORTUGUÊS BRASILEIRO NATIVO:
- GANCHO VIRAL (0-3s): Fala impactante inédita.
- NARRATIVA UGC: Uso prático do produto com realismo.
- ESCASSEZ: Gatilho mental de estoque acabando.
- CTA: Chamada clara para o carrinho.

SAÍDA OBRIGATÓRIA (MANTENHA ESTA INTRODUÇÃO):
"Aqui está uma proposta original de prompt e roteiro focado em conversão para TikTok Shop, mantendo a fidelidade ao produto e evitando direitos autorais:

PROMPT VISUAL: [Descreva a cena cinematográfica, movimentos suaves, sem bugs, sem membros duplicados, modelo similar original, produto 1:1]
ROTEIRO DE NARRAÇÃO: [Texto completo das falas em Português Brasileiro nativo com fala natural e fluida].""#;
